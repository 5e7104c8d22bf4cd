//! One logged-in (or not yet logged-in) client connection.

use crate::auth::CredentialStore;
use crate::error::{Result, ServerError};
use crate::protocol::{parse_amount, Request, Response};
use rollbux_coinflip::{CoinSide, CoinflipEngine, EventKind, LedgerEvent, Subscription, Topic};
use rollbux_core::Principal;
use serde_json::json;
use std::sync::Arc;

/// Everything a session needs from the running server.
pub struct AppState {
    pub engine: Arc<CoinflipEngine>,
    pub credentials: Arc<CredentialStore>,
}

/// Event feeds opened at login: wager lifecycle for everyone, balances for
/// the principal only.
struct Feeds {
    wagers: Subscription,
    balances: Subscription,
}

pub struct Session {
    state: Arc<AppState>,
    principal: Option<Principal>,
    feeds: Option<Feeds>,
}

impl Session {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            principal: None,
            feeds: None,
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Handle one request line. Failures become error responses.
    pub async fn handle_line(&mut self, line: &str) -> Response {
        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("Rejected malformed request: {}", e);
                return Response::error(None, &e);
            }
        };

        let name = request.name();
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    ServerError::Wager(inner) if !inner.is_recoverable() => {
                        tracing::error!("{} failed for {:?}: {}", name, self.principal(), e)
                    }
                    _ => tracing::debug!("{} rejected: {}", name, e),
                }
                Response::error(Some(name), &e)
            }
        }
    }

    async fn dispatch(&mut self, request: Request) -> Result<Response> {
        let name = request.name();
        let engine = self.state.engine.clone();

        match request {
            Request::Register { username, password } => {
                if password.is_empty() {
                    return Err(ServerError::bad_request("Password cannot be empty"));
                }
                let account = engine.register(&username).await?;
                self.state
                    .credentials
                    .set_password(&account.identity, &password)
                    .await?;

                tracing::info!("Registered '{}'", account.identity);
                Response::ok(
                    name,
                    json!({ "username": account.identity, "balance": account.balance }),
                )
            }

            Request::Login { username, password } => {
                let username = username.trim();
                if !self.state.credentials.verify(username, &password).await? {
                    tracing::warn!("Failed login for '{}'", username);
                    return Err(ServerError::InvalidCredentials);
                }

                let principal = Principal::authenticated(username);
                let balance = engine.balance(&principal).await?;
                self.feeds = Some(Feeds {
                    wagers: engine.subscribe(Topic::All),
                    balances: engine.subscribe(Topic::Identity(username.to_string())),
                });
                self.principal = Some(principal);

                tracing::info!("'{}' logged in", username);
                Response::ok(name, json!({ "username": username, "balance": balance }))
            }

            request => {
                let principal = self.principal.clone().ok_or(ServerError::NotLoggedIn)?;
                if let Some(requested) = request.acting_as() {
                    principal.authorize(requested)?;
                }
                Self::dispatch_authenticated(&engine, &principal, request).await
            }
        }
    }

    async fn dispatch_authenticated(
        engine: &CoinflipEngine,
        principal: &Principal,
        request: Request,
    ) -> Result<Response> {
        let name = request.name();

        match request {
            Request::CreateCoinflip { amount, choice, .. } => {
                let stake = parse_amount(&amount)?;
                let prediction: CoinSide = choice.parse()?;
                let wager = engine.create_wager(principal, stake, prediction).await?;
                Response::ok(name, wager)
            }
            Request::JoinCoinflip { wager_id, .. } => {
                let settlement = engine.join_wager(principal, wager_id).await?;
                Response::ok(name, settlement)
            }
            Request::CancelCoinflip { wager_id, .. } => {
                let wager = engine.cancel_wager(principal, wager_id).await?;
                Response::ok(name, wager)
            }
            Request::ListCoinflips => Response::ok(name, engine.list_open().await),
            Request::Deposit { amount, .. } => {
                let balance = engine.deposit(principal, parse_amount(&amount)?).await?;
                Response::ok(name, json!({ "balance": balance }))
            }
            Request::Withdraw { amount, .. } => {
                let balance = engine.withdraw(principal, parse_amount(&amount)?).await?;
                Response::ok(name, json!({ "balance": balance }))
            }
            Request::Balance { .. } => {
                let balance = engine.balance(principal).await?;
                let escrow = engine.escrow(principal).await;
                Response::ok(name, json!({ "balance": balance, "escrow": escrow }))
            }
            Request::Register { .. } | Request::Login { .. } => {
                Err(ServerError::bad_request(format!("{} is not a session request", name)))
            }
        }
    }

    /// Next event to push to the client. Pending until login.
    pub async fn next_event(&mut self) -> Option<LedgerEvent> {
        let Some(feeds) = self.feeds.as_mut() else {
            return std::future::pending().await;
        };

        loop {
            tokio::select! {
                Some(event) = feeds.wagers.recv() => {
                    if event.kind.wager_id().is_some() {
                        return Some(event);
                    }
                }
                Some(event) = feeds.balances.recv() => {
                    if matches!(event.kind, EventKind::BalanceChanged { .. }) {
                        return Some(event);
                    }
                }
                else => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollbux_coinflip::{EngineConfig, FixedCoin};
    use rollbux_core::{AccountStore, Storage};
    use serde_json::Value;

    async fn state() -> Arc<AppState> {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let accounts = Arc::new(AccountStore::open(storage.clone()).await.unwrap());
        let engine = CoinflipEngine::new(
            accounts,
            Arc::new(FixedCoin(CoinSide::Heads)),
            EngineConfig::default(),
        )
        .unwrap();
        let credentials = CredentialStore::with_rounds(storage, 1_000).await.unwrap();

        Arc::new(AppState {
            engine: Arc::new(engine),
            credentials: Arc::new(credentials),
        })
    }

    async fn send(session: &mut Session, line: &str) -> Value {
        serde_json::to_value(session.handle_line(line).await).unwrap()
    }

    async fn logged_in(state: &Arc<AppState>, username: &str, deposit: u64) -> Session {
        let mut session = Session::new(state.clone());
        let register = format!(
            r#"{{"type":"register","username":"{}","password":"pw"}}"#,
            username
        );
        assert_eq!(send(&mut session, &register).await["type"], "ok");
        let login = format!(
            r#"{{"type":"login","username":"{}","password":"pw"}}"#,
            username
        );
        assert_eq!(send(&mut session, &login).await["type"], "ok");
        let line = format!(r#"{{"type":"deposit","amount":{}}}"#, deposit);
        assert_eq!(send(&mut session, &line).await["data"]["balance"], deposit);
        session
    }

    #[tokio::test]
    async fn test_requests_require_login() {
        let state = state().await;
        let mut session = Session::new(state);

        let response = send(&mut session, r#"{"type":"balance"}"#).await;
        assert_eq!(response["type"], "error");
        assert_eq!(response["code"], "NotLoggedIn");
        assert_eq!(response["request"], "balance");

        let response = send(&mut session, "{").await;
        assert_eq!(response["code"], "BadRequest");
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let state = state().await;
        let mut session = Session::new(state.clone());

        let register = r#"{"type":"register","username":"alice","password":"pw"}"#;
        assert_eq!(send(&mut session, register).await["type"], "ok");
        assert_eq!(send(&mut session, register).await["code"], "AlreadyExists");

        let response = send(
            &mut session,
            r#"{"type":"login","username":"alice","password":"wrong"}"#,
        )
        .await;
        assert_eq!(response["code"], "InvalidCredentials");
        assert!(session.principal().is_none());

        let response = send(
            &mut session,
            r#"{"type":"login","username":"alice","password":"pw"}"#,
        )
        .await;
        assert_eq!(response["data"]["username"], "alice");
        assert_eq!(response["data"]["balance"], 0);
        assert_eq!(session.principal().unwrap().identity(), "alice");
    }

    #[tokio::test]
    async fn test_cannot_act_as_someone_else() {
        let state = state().await;
        let mut alice = logged_in(&state, "alice", 100).await;
        let _bob = logged_in(&state, "bob", 50).await;

        let response = send(
            &mut alice,
            r#"{"type":"withdraw","amount":10,"username":"bob"}"#,
        )
        .await;
        assert_eq!(response["code"], "Unauthorized");

        let response = send(&mut alice, r#"{"type":"balance","username":"alice"}"#).await;
        assert_eq!(response["data"]["balance"], 100);
    }

    #[tokio::test]
    async fn test_amount_validation() {
        let state = state().await;
        let mut alice = logged_in(&state, "alice", 100).await;

        for amount in ["-5", "2.5"] {
            let line = format!(r#"{{"type":"deposit","amount":{}}}"#, amount);
            assert_eq!(send(&mut alice, &line).await["code"], "InvalidAmount");
        }
        let response = send(
            &mut alice,
            r#"{"type":"create_coinflip","amount":10,"choice":"edge"}"#,
        )
        .await;
        assert_eq!(response["code"], "InvalidPrediction");

        let response = send(&mut alice, r#"{"type":"balance"}"#).await;
        assert_eq!(response["data"]["balance"], 100);
    }

    #[tokio::test]
    async fn test_coinflip_over_sessions() {
        let state = state().await;
        let mut alice = logged_in(&state, "alice", 100).await;
        let mut bob = logged_in(&state, "bob", 50).await;
        while alice.feeds.as_mut().unwrap().wagers.try_recv().is_some() {}
        while alice.feeds.as_mut().unwrap().balances.try_recv().is_some() {}

        let created = send(
            &mut alice,
            r#"{"type":"create_coinflip","amount":40,"choice":"heads"}"#,
        )
        .await;
        assert_eq!(created["type"], "ok");
        let wager_id = created["data"]["id"].as_str().unwrap().to_string();

        let listed = send(&mut bob, r#"{"type":"list_coinflips"}"#).await;
        assert_eq!(listed["data"][0]["id"], wager_id.as_str());

        let join = format!(r#"{{"type":"join_coinflip","wager_id":"{}"}}"#, wager_id);
        let settled = send(&mut bob, &join).await;
        assert_eq!(settled["data"]["winner"], "alice");
        assert_eq!(settled["data"]["payout"], 80);

        let balance = send(&mut alice, r#"{"type":"balance"}"#).await;
        assert_eq!(balance["data"]["balance"], 140);
        assert_eq!(balance["data"]["escrow"], 0);

        let mut kinds = Vec::new();
        for _ in 0..5 {
            let event = alice.next_event().await.unwrap();
            let value = serde_json::to_value(&event).unwrap();
            kinds.push(value["kind"].as_str().unwrap().to_string());
        }
        let wager_kinds: Vec<&str> = kinds
            .iter()
            .map(String::as_str)
            .filter(|kind| *kind != "balance_changed")
            .collect();
        assert_eq!(
            wager_kinds,
            vec!["wager_opened", "wager_claimed", "wager_settled"]
        );
    }
}
