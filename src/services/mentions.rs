//! Single-pass message content scanner.
//!
//! Extracts `@username`, `@roleName`, `@everyone`, `#channelName`, custom
//! emoji `:name:serverId:emojiId:` tokens and `/invite/<code>` URL patterns
//! in one left-to-right scan. Candidates are resolved against the actual
//! members, roles and channels the caller supplies, so unknown tokens stay
//! plain text. The scan is deterministic and never alters the content.

use nexus_proto::model::{CustomEmojiWire, Mentions};
use std::collections::HashMap;

/// Name -> id lookup tables, keys lowercased.
#[derive(Debug, Default)]
pub struct MentionContext {
    pub users: HashMap<String, String>,
    pub roles: HashMap<String, String>,
    pub channels: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct ParsedContent {
    pub mentions: Mentions,
    pub channel_links: Vec<String>,
    pub invite_codes: Vec<String>,
    pub custom_emojis: Vec<CustomEmojiWire>,
}

const INVITE_PREFIX: &str = "/invite/";

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn is_code_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
}

/// Scan `content` once, left to right.
pub fn parse(content: &str, ctx: &MentionContext) -> ParsedContent {
    let mut out = ParsedContent::default();
    let bytes = content.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'@' => {
                let token = take_while(content, i + 1, is_name_char);
                if !token.is_empty() {
                    let lower = token.to_ascii_lowercase();
                    if lower == "everyone" {
                        out.mentions.everyone = true;
                    } else if let Some(user_id) = ctx.users.get(&lower) {
                        push_unique(&mut out.mentions.users, user_id);
                    } else if let Some(role_id) = ctx.roles.get(&lower) {
                        push_unique(&mut out.mentions.roles, role_id);
                    }
                    i += 1 + token.len();
                } else {
                    i += 1;
                }
            }
            b'#' => {
                let token = take_while(content, i + 1, is_name_char);
                if !token.is_empty() {
                    if let Some(channel_id) = ctx.channels.get(&token.to_ascii_lowercase()) {
                        push_unique(&mut out.channel_links, channel_id);
                    }
                    i += 1 + token.len();
                } else {
                    i += 1;
                }
            }
            b':' => {
                if let Some((emoji, consumed)) = parse_custom_emoji(&content[i..]) {
                    out.custom_emojis.push(emoji);
                    i += consumed;
                } else {
                    i += 1;
                }
            }
            b'/' => {
                if content[i..].starts_with(INVITE_PREFIX) {
                    let code = take_while(content, i + INVITE_PREFIX.len(), is_code_char);
                    if !code.is_empty() {
                        let len = code.len();
                        push_unique(&mut out.invite_codes, code);
                        i += INVITE_PREFIX.len() + len;
                        continue;
                    }
                }
                i += 1;
            }
            _ => {
                // Advance one full character, not one byte.
                let c = content[i..].chars().next().map_or(1, char::len_utf8);
                i += c;
            }
        }
    }

    out
}

/// Parse `:name:serverId:emojiId:` from the start of `rest`.
/// Returns the emoji and the byte length consumed.
fn parse_custom_emoji(rest: &str) -> Option<(CustomEmojiWire, usize)> {
    let mut parts = Vec::with_capacity(3);
    let mut cursor = 1; // past the opening ':'
    for _ in 0..3 {
        let token = take_while(rest, cursor, is_name_char);
        if token.is_empty() {
            return None;
        }
        cursor += token.len();
        if rest.as_bytes().get(cursor) != Some(&b':') {
            return None;
        }
        cursor += 1;
        parts.push(token);
    }
    let emoji_id = parts.pop()?;
    let server_id = parts.pop()?;
    let name = parts.pop()?;
    Some((
        CustomEmojiWire {
            name,
            server_id,
            emoji_id,
        },
        cursor,
    ))
}

fn take_while(content: &str, start: usize, pred: impl Fn(char) -> bool) -> String {
    content[start.min(content.len())..]
        .chars()
        .take_while(|&c| pred(c))
        .collect()
}

fn push_unique(list: &mut Vec<String>, value: impl Into<String>) {
    let value = value.into();
    if !list.contains(&value) {
        list.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> MentionContext {
        let mut ctx = MentionContext::default();
        ctx.users.insert("alice".into(), "u_alice".into());
        ctx.users.insert("bob".into(), "u_bob".into());
        ctx.roles.insert("mods".into(), "r_mods".into());
        ctx.channels.insert("general".into(), "c_general".into());
        ctx
    }

    #[test]
    fn extracts_known_user_mentions() {
        let parsed = parse("hey @alice and @Bob, see @stranger", &ctx());
        assert_eq!(parsed.mentions.users, vec!["u_alice", "u_bob"]);
        assert!(!parsed.mentions.everyone);
    }

    #[test]
    fn extracts_roles_everyone_and_channels() {
        let parsed = parse("@everyone @mods look at #general", &ctx());
        assert!(parsed.mentions.everyone);
        assert_eq!(parsed.mentions.roles, vec!["r_mods"]);
        assert_eq!(parsed.channel_links, vec!["c_general"]);
    }

    #[test]
    fn duplicate_mentions_collapse() {
        let parsed = parse("@alice @alice @alice", &ctx());
        assert_eq!(parsed.mentions.users, vec!["u_alice"]);
    }

    #[test]
    fn invite_codes_from_urls() {
        let parsed = parse("join https://nexus.chat/invite/a1b2c3d4e5f6 now", &ctx());
        assert_eq!(parsed.invite_codes, vec!["a1b2c3d4e5f6"]);
    }

    #[test]
    fn custom_emoji_round_trip() {
        let parsed = parse("look :blob:s_1:e_9: here", &ctx());
        assert_eq!(
            parsed.custom_emojis,
            vec![CustomEmojiWire {
                name: "blob".into(),
                server_id: "s_1".into(),
                emoji_id: "e_9".into(),
            }]
        );
    }

    #[test]
    fn plain_colons_are_not_emoji() {
        let parsed = parse("time is 12:30: ok", &ctx());
        assert!(parsed.custom_emojis.is_empty());
    }

    #[test]
    fn deterministic_over_repeated_runs() {
        let content = "@alice #general /invite/abc123 :x:s:e: @everyone";
        let a = parse(content, &ctx());
        let b = parse(content, &ctx());
        assert_eq!(a.mentions.users, b.mentions.users);
        assert_eq!(a.channel_links, b.channel_links);
        assert_eq!(a.invite_codes, b.invite_codes);
        assert_eq!(a.custom_emojis, b.custom_emojis);
    }

    #[test]
    fn unicode_content_is_safe() {
        let parsed = parse("héllo ☃ @alice — fin", &ctx());
        assert_eq!(parsed.mentions.users, vec!["u_alice"]);
    }
}
