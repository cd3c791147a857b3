//! Account lifecycle: register, login, logout, delete, and the
//! case-insensitive username uniqueness invariant.

mod common;

use nexusd::error::AppError;

#[tokio::test]
async fn register_then_login_returns_usable_token() {
    let app = common::spawn().await;

    let registered = common::register(&app, "alice").await;
    assert_eq!(registered.user.username, "alice");

    let login = app
        .hub
        .sessions
        .login("alice", "Pw12345!!")
        .await
        .expect("login");
    let principal = app
        .hub
        .sessions
        .authenticate(&login.token)
        .await
        .expect("token authenticates");
    assert_eq!(principal.user_id, registered.user.id);
}

#[tokio::test]
async fn wrong_password_is_auth_invalid() {
    let app = common::spawn().await;
    common::register(&app, "alice").await;

    let err = app
        .hub
        .sessions
        .login("alice", "not-the-password")
        .await
        .expect_err("must fail");
    assert!(matches!(err, AppError::AuthInvalid));
}

#[tokio::test]
async fn concurrent_duplicate_registration_yields_one_conflict() {
    let app = common::spawn().await;

    let (a, b) = tokio::join!(
        app.hub.sessions.register("alice", "Pw12345!!"),
        app.hub.sessions.register("Alice", "Pw12345!!"),
    );

    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1, "exactly one registration may win");
    let conflict = [a, b].into_iter().find(|r| r.is_err()).unwrap().unwrap_err();
    assert_eq!(conflict.kind(), "conflict");
}

#[tokio::test]
async fn logout_revokes_the_token() {
    let app = common::spawn().await;
    let outcome = common::register(&app, "alice").await;

    app.hub.sessions.logout(&outcome.token).await.expect("logout");
    let err = app
        .hub
        .sessions
        .authenticate(&outcome.token)
        .await
        .expect_err("revoked token");
    assert!(matches!(err, AppError::AuthInvalid));
}

#[tokio::test]
async fn account_delete_revokes_every_session() {
    let app = common::spawn().await;
    let outcome = common::register(&app, "alice").await;
    let second_login = app.hub.sessions.login("alice", "Pw12345!!").await.unwrap();

    app.hub
        .sessions
        .delete_account(&outcome.token)
        .await
        .expect("delete");

    for token in [outcome.token, second_login.token] {
        assert!(app.hub.sessions.authenticate(&token).await.is_err());
    }
}

#[tokio::test]
async fn username_rules_are_enforced() {
    let app = common::spawn().await;
    for bad in ["", "has space", "_lead", &"x".repeat(33)] {
        let err = app
            .hub
            .sessions
            .register(bad, "Pw12345!!")
            .await
            .expect_err("must be rejected");
        assert_eq!(err.kind(), "validation", "{bad:?}");
    }
    // Short passwords are rejected too.
    let err = app.hub.sessions.register("bob", "short").await.unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn registration_provisions_a_personal_server() {
    let app = common::spawn().await;
    let outcome = common::register(&app, "alice").await;

    let personal = app
        .hub
        .store
        .servers()
        .personal_server_of(&outcome.user.id)
        .await
        .expect("query")
        .expect("personal server exists");
    assert_eq!(personal.is_personal, 1);
    assert_eq!(personal.owner_id, outcome.user.id);
}
