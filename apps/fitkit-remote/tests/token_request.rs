use async_trait::async_trait;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use fitkit_remote::auth::{
    AuthError, AuthPrompt, AuthProvider, KeyringAuthProvider, MemoryStore, TokenRequester,
    TokenStore,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Auth server that approves request `req-1` after `pending` polls.
struct AuthServer {
    pending: usize,
    deny: bool,
    polls: AtomicUsize,
    issued: AtomicUsize,
}

async fn token_endpoint(State(state): State<Arc<AuthServer>>, RawQuery(query): RawQuery) -> Response {
    match query.as_deref() {
        Some("new") => {
            state.issued.fetch_add(1, Ordering::SeqCst);
            "req-1\n".into_response()
        }
        Some("request=req-1") => {
            if state.deny {
                return StatusCode::FORBIDDEN.into_response();
            }
            let polls = state.polls.fetch_add(1, Ordering::SeqCst);
            if polls < state.pending {
                String::new().into_response()
            } else {
                "issued-token".into_response()
            }
        }
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn spawn_auth_server(pending: usize, deny: bool) -> (Arc<AuthServer>, TokenRequester) {
    let state = Arc::new(AuthServer {
        pending,
        deny,
        polls: AtomicUsize::new(0),
        issued: AtomicUsize::new(0),
    });
    let app = Router::new()
        .route("/token", get(token_endpoint))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let requester = TokenRequester::new(
        &format!("http://{addr}/token"),
        &format!("http://{addr}/generate"),
    )
    .unwrap()
    .with_poll_interval(Duration::from_millis(10));
    (state, requester)
}

#[derive(Default)]
struct ScriptedPrompt {
    decline: bool,
    give_up: bool,
    confirmations: AtomicUsize,
    shown: Mutex<Vec<Url>>,
}

#[async_trait]
impl AuthPrompt for ScriptedPrompt {
    async fn confirm(&self, _message: &str) -> bool {
        self.confirmations.fetch_add(1, Ordering::SeqCst);
        !self.decline
    }

    fn show_verification(&self, url: &Url) {
        self.shown.lock().push(url.clone());
    }

    async fn cancelled(&self) {
        if !self.give_up {
            std::future::pending::<()>().await;
        }
    }
}

async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("token flow did not finish")
}

#[tokio::test]
async fn approved_request_yields_token() {
    let (server, requester) = spawn_auth_server(2, false).await;
    let prompt = ScriptedPrompt::default();

    let token = within(requester.request_token(&prompt)).await.unwrap();

    assert_eq!(token, "issued-token");
    assert_eq!(server.issued.load(Ordering::SeqCst), 1);
    assert_eq!(server.polls.load(Ordering::SeqCst), 3);
    let shown = prompt.shown.lock();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].path(), "/generate");
    assert_eq!(
        shown[0].query(),
        Some("request=req-1&appname=FITkit+Remote+CLI")
    );
}

#[tokio::test]
async fn declined_confirmation_never_contacts_server() {
    let (server, requester) = spawn_auth_server(0, false).await;
    let prompt = ScriptedPrompt {
        decline: true,
        ..Default::default()
    };

    let err = within(requester.request_token(&prompt)).await.unwrap_err();

    assert!(matches!(err, AuthError::Cancelled));
    assert_eq!(server.issued.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn denied_request_is_an_error() {
    let (_server, requester) = spawn_auth_server(0, true).await;
    let prompt = ScriptedPrompt::default();

    let err = within(requester.request_token(&prompt)).await.unwrap_err();

    assert!(matches!(err, AuthError::Denied));
}

#[tokio::test]
async fn giving_up_cancels_polling() {
    let (server, requester) = spawn_auth_server(usize::MAX, false).await;
    let prompt = ScriptedPrompt {
        give_up: true,
        ..Default::default()
    };

    let err = within(requester.request_token(&prompt)).await.unwrap_err();

    assert!(matches!(err, AuthError::Cancelled));
    assert_eq!(prompt.shown.lock().len(), 1);
    assert_eq!(server.polls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn provider_persists_and_reuses_acquired_token() {
    let (server, requester) = spawn_auth_server(0, false).await;
    let store = Arc::new(MemoryStore::default());
    let prompt = Arc::new(ScriptedPrompt::default());
    let provider = KeyringAuthProvider::new(store.clone(), Some(requester), prompt.clone());

    assert_eq!(within(provider.get_token(false)).await.unwrap(), "issued-token");
    assert_eq!(store.load().unwrap().as_deref(), Some("issued-token"));
    assert_eq!(within(provider.get_token(false)).await.unwrap(), "issued-token");
    assert_eq!(server.issued.load(Ordering::SeqCst), 1);

    provider.invalidate();
    assert!(store.load().unwrap().is_none());
    assert!(provider.current().is_none());

    within(provider.get_token(false)).await.unwrap();
    assert_eq!(server.issued.load(Ordering::SeqCst), 2);
    assert_eq!(prompt.confirmations.load(Ordering::SeqCst), 2);
}
