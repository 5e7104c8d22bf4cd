use crate::error::Result;
use crate::protocol::Response;
use crate::session::{AppState, Session};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Accept connections until the listener fails.
pub async fn run(state: Arc<AppState>, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!("Client connected: {}", peer);

        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(state, stream, peer).await {
                tracing::warn!("Connection {} closed with error: {}", peer, e);
            }
            tracing::info!("Client disconnected: {}", peer);
        });
    }
}

async fn serve_connection(state: Arc<AppState>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut session = Session::new(state);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                tracing::debug!("{} -> {}", peer, line);
                let response = session.handle_line(&line).await;
                writer.write_all(response.to_line()?.as_bytes()).await?;
            }
            Some(event) = session.next_event() => {
                let response = Response::Event { event };
                writer.write_all(response.to_line()?.as_bytes()).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CredentialStore;
    use rollbux_coinflip::{CoinSide, CoinflipEngine, EngineConfig, FixedCoin};
    use rollbux_core::{AccountStore, Storage};
    use serde_json::Value;
    use tokio::io::Lines;
    use tokio::net::tcp::OwnedReadHalf;
    use tokio::net::tcp::OwnedWriteHalf;

    struct Client {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (reader, writer) = stream.into_split();
            Self {
                lines: BufReader::new(reader).lines(),
                writer,
            }
        }

        async fn send(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }

        async fn next(&mut self) -> Value {
            let line = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        /// Skip pushed events until the reply to a request arrives.
        async fn reply(&mut self) -> Value {
            loop {
                let message = self.next().await;
                if message["type"] != "event" {
                    return message;
                }
            }
        }

        async fn request(&mut self, line: &str) -> Value {
            self.send(line).await;
            self.reply().await
        }
    }

    async fn start() -> SocketAddr {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let accounts = Arc::new(AccountStore::open(storage.clone()).await.unwrap());
        let engine = CoinflipEngine::new(
            accounts,
            Arc::new(FixedCoin(CoinSide::Tails)),
            EngineConfig::default(),
        )
        .unwrap();
        let state = Arc::new(AppState {
            engine: Arc::new(engine),
            credentials: Arc::new(CredentialStore::with_rounds(storage, 1_000).await.unwrap()),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run(state, listener));
        addr
    }

    async fn login(addr: SocketAddr, username: &str, deposit: u64) -> Client {
        let mut client = Client::connect(addr).await;
        let credentials = format!(r#""username":"{}","password":"pw""#, username);
        assert_eq!(
            client
                .request(&format!(r#"{{"type":"register",{}}}"#, credentials))
                .await["type"],
            "ok"
        );
        assert_eq!(
            client
                .request(&format!(r#"{{"type":"login",{}}}"#, credentials))
                .await["type"],
            "ok"
        );
        let deposited = client
            .request(&format!(r#"{{"type":"deposit","amount":{}}}"#, deposit))
            .await;
        assert_eq!(deposited["data"]["balance"], deposit);
        client
    }

    #[tokio::test]
    async fn test_wager_over_tcp() {
        let addr = start().await;
        let mut alice = login(addr, "alice", 100).await;
        let mut bob = login(addr, "bob", 50).await;

        let created = alice
            .request(r#"{"type":"create_coinflip","amount":40,"choice":"Heads"}"#)
            .await;
        let wager_id = created["data"]["id"].as_str().unwrap().to_string();

        // bob sees the new wager pushed to him.
        loop {
            let message = bob.next().await;
            if message["type"] == "event" && message["event"]["kind"] == "wager_opened" {
                assert_eq!(message["event"]["wager"]["id"], wager_id.as_str());
                break;
            }
        }

        let settled = bob
            .request(&format!(
                r#"{{"type":"join_coinflip","wager_id":"{}"}}"#,
                wager_id
            ))
            .await;
        assert_eq!(settled["type"], "ok");
        assert_eq!(settled["data"]["winner"], "bob");
        assert_eq!(settled["data"]["winner_balance"], 90);

        let balance = alice.request(r#"{"type":"balance"}"#).await;
        assert_eq!(balance["data"]["balance"], 60);
    }

    #[tokio::test]
    async fn test_unauthenticated_and_malformed() {
        let addr = start().await;
        let mut client = Client::connect(addr).await;

        let reply = client
            .request(r#"{"type":"create_coinflip","amount":5,"choice":"Tails"}"#)
            .await;
        assert_eq!(reply["code"], "NotLoggedIn");

        client.send("").await;
        let reply = client.request("garbage").await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "BadRequest");
    }
}
