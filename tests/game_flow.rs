//! End-to-end games over real websocket connections.

use std::sync::Arc;
use std::time::Duration;

use chess_relay_server::game::shakmaty_factory;
use chess_relay_server::{ConnectionPool, GameManager, WebSocketServer};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(200);

async fn start_server() -> (String, Arc<GameManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let games = Arc::new(GameManager::new(Arc::new(ConnectionPool::new()), shakmaty_factory()));
    let server = Arc::new(WebSocketServer::new(games.clone()));
    tokio::spawn(server.run(listener, std::future::pending()));
    (format!("ws://{}", addr), games)
}

async fn connect(url: &str) -> Client {
    let (ws, _) = assert_ok!(connect_async(url).await);
    ws
}

async fn send(client: &mut Client, value: Value) {
    assert_ok!(client.send(Message::Text(value.to_string())).await);
}

async fn recv(client: &mut Client) -> Value {
    loop {
        let frame = timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a server message")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("server sent invalid json");
        }
    }
}

async fn assert_silent(client: &mut Client) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(QUIET_PERIOD, client.next()).await {
        panic!("unexpected message: {}", text);
    }
}

async fn play(white: &mut Client, black: &mut Client, moves: &[(&str, &str)]) -> Vec<Value> {
    let mut last = Vec::new();
    for (n, (from, to)) in moves.iter().enumerate() {
        let mover = if n % 2 == 0 { &mut *white } else { &mut *black };
        send(mover, json!({"type": "move", "move": {"from": from, "to": to}})).await;
        last = vec![recv(white).await, recv(black).await];
        for msg in &last {
            assert_eq!(msg["type"], "move", "move {}{} rejected: {}", from, to, msg);
        }
    }
    last
}

async fn paired(url: &str) -> (Client, Client) {
    let mut a = connect(url).await;
    let mut b = connect(url).await;
    send(&mut a, json!({"type": "init_game"})).await;
    assert_eq!(recv(&mut a).await["type"], "WAITING_FOR_OPPONENT");
    send(&mut b, json!({"type": "init_game"})).await;
    assert_eq!(recv(&mut a).await["type"], "init_game");
    assert_eq!(recv(&mut b).await["type"], "init_game");
    (a, b)
}

#[test_log::test(tokio::test)]
async fn test_pairing_move_and_illegal_move() {
    let (url, games) = start_server().await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;

    send(&mut a, json!({"type": "init_game"})).await;
    let waiting = recv(&mut a).await;
    assert_eq!(waiting["type"], "WAITING_FOR_OPPONENT");
    assert_eq!(waiting["payload"]["color"], "white");

    send(&mut b, json!({"type": "init_game"})).await;
    let init_a = recv(&mut a).await;
    let init_b = recv(&mut b).await;
    assert_eq!(init_a["type"], "init_game");
    assert_eq!(init_a["payload"]["color"], "white");
    assert_eq!(init_b["payload"]["color"], "black");
    assert_eq!(init_a["payload"]["gameId"], init_b["payload"]["gameId"]);
    assert_eq!(init_a["payload"]["turn"], "white");
    assert_eq!(
        init_b["payload"]["board"],
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
    );

    send(&mut a, json!({"type": "move", "move": {"from": "e2", "to": "e4"}})).await;
    for msg in [recv(&mut a).await, recv(&mut b).await] {
        assert_eq!(msg["type"], "move");
        assert_eq!(msg["payload"]["turn"], "black");
        assert_eq!(msg["payload"]["moveCount"], 1);
        assert_eq!(msg["payload"]["move"]["from"], "e2");
        assert_eq!(msg["payload"]["move"]["to"], "e4");
        assert_eq!(msg["payload"]["history"], json!(["e4"]));
    }

    send(&mut b, json!({"type": "move", "move": {"from": "e7", "to": "e4"}})).await;
    let error = recv(&mut b).await;
    assert_eq!(error["type"], "ERROR");
    let mut possible: Vec<String> =
        serde_json::from_value(error["payload"]["possibleMoves"].clone()).unwrap();
    possible.sort();
    assert_eq!(possible, vec!["e5", "e6"]);
    assert!(error["payload"]["board"].as_str().unwrap().contains(" b KQkq "));
    assert_silent(&mut a).await;

    let stats = games.stats().await;
    assert_eq!(stats.active_games, 1);
    assert!(!stats.player_waiting);

    // still black to move, and the count did not advance
    send(&mut b, json!({"type": "move", "move": {"from": "e7", "to": "e5"}})).await;
    let msg = recv(&mut a).await;
    assert_eq!(msg["payload"]["moveCount"], 2);
    assert_eq!(msg["payload"]["turn"], "white");
}

#[test_log::test(tokio::test)]
async fn test_off_turn_and_malformed_moves() {
    let (url, _games) = start_server().await;
    let (mut white, mut black) = paired(&url).await;

    send(&mut black, json!({"type": "move", "move": {"from": "e7", "to": "e5"}})).await;
    let error = recv(&mut black).await;
    assert_eq!(error["type"], "ERROR");
    assert_eq!(error["payload"]["message"], "It's not your turn!");
    assert_silent(&mut white).await;

    send(&mut white, json!({"type": "move", "move": {"from": "", "to": "e4"}})).await;
    let error = recv(&mut white).await;
    assert_eq!(error["type"], "ERROR");
    assert!(error["payload"]["message"].as_str().unwrap().starts_with("Invalid move format"));

    send(&mut white, json!({"type": "resign"})).await;
    let error = recv(&mut white).await;
    assert!(error["payload"]["message"].as_str().unwrap().starts_with("Invalid JSON format"));

    // the session survives all of the above
    send(&mut white, json!({"type": "move", "move": {"from": "d2", "to": "d4"}})).await;
    assert_eq!(recv(&mut white).await["payload"]["moveCount"], 1);
    assert_eq!(recv(&mut black).await["payload"]["moveCount"], 1);
}

#[test_log::test(tokio::test)]
async fn test_valid_moves_query_is_private() {
    let (url, _games) = start_server().await;
    let (mut white, mut black) = paired(&url).await;

    send(&mut white, json!({"type": "get_valid_moves", "square": "b1"})).await;
    let reply = recv(&mut white).await;
    assert_eq!(reply["type"], "VALID_MOVES");
    assert_eq!(reply["payload"]["square"], "b1");
    let mut moves: Vec<String> = serde_json::from_value(reply["payload"]["moves"].clone()).unwrap();
    moves.sort();
    assert_eq!(moves, vec!["a3", "c3"]);
    assert_silent(&mut black).await;

    // only the side to move has legal moves
    send(&mut black, json!({"type": "get_valid_moves", "square": "b8"})).await;
    let reply = recv(&mut black).await;
    assert_eq!(reply["type"], "VALID_MOVES");
    assert_eq!(reply["payload"]["moves"], json!([]));

    send(&mut white, json!({"type": "get_valid_moves", "square": "j9"})).await;
    assert_eq!(recv(&mut white).await["type"], "ERROR");
    assert_silent(&mut black).await;
}

#[test_log::test(tokio::test)]
async fn test_checkmate_ends_game() {
    let (url, games) = start_server().await;
    let (mut white, mut black) = paired(&url).await;

    let last = play(
        &mut white,
        &mut black,
        &[("f2", "f3"), ("e7", "e5"), ("g2", "g4"), ("d8", "h4")],
    )
    .await;
    assert_eq!(last[0]["payload"]["isCheck"], true);
    assert_eq!(last[0]["payload"]["possibleMoves"], json!([]));

    for client in [&mut white, &mut black] {
        let over = recv(client).await;
        assert_eq!(over["type"], "GAME_OVER");
        assert_eq!(over["payload"]["winner"], "black");
        assert_eq!(over["payload"]["reason"], "checkmate");
        assert_eq!(over["payload"]["history"], json!(["f3", "e5", "g4", "Qh4#"]));
        assert_eq!(over["payload"]["finalPosition"], over["payload"]["board"]);
    }
    assert_eq!(games.stats().await.active_games, 0);

    send(&mut white, json!({"type": "move", "move": {"from": "e2", "to": "e4"}})).await;
    assert_eq!(recv(&mut white).await["payload"]["message"], "You are not in any active game!");
}

#[test_log::test(tokio::test)]
async fn test_castling_by_king_squares() {
    let (url, _games) = start_server().await;
    let (mut white, mut black) = paired(&url).await;

    play(
        &mut white,
        &mut black,
        &[("e2", "e4"), ("e7", "e5"), ("g1", "f3"), ("b8", "c6"), ("f1", "c4"), ("g8", "f6")],
    )
    .await;

    send(&mut white, json!({"type": "move", "move": {"from": "e1", "to": "g1"}})).await;
    let msg = recv(&mut black).await;
    assert_eq!(msg["payload"]["move"]["san"], "O-O");
    assert_eq!(msg["payload"]["moveCount"], 7);
}

#[test_log::test(tokio::test)]
async fn test_disconnect_notifies_opponent_once() {
    let (url, games) = start_server().await;
    let (white, mut black) = paired(&url).await;

    drop(white);

    let ended = recv(&mut black).await;
    assert_eq!(ended["type"], "GAME_ENDED");
    assert_eq!(ended["payload"]["reason"], "Player disconnected");
    assert_silent(&mut black).await;

    sleep(QUIET_PERIOD).await;
    let stats = games.stats().await;
    assert_eq!(stats.active_games, 0);
    assert_eq!(stats.connections, 1);

    // the survivor goes back into the queue
    send(&mut black, json!({"type": "init_game"})).await;
    assert_eq!(recv(&mut black).await["type"], "WAITING_FOR_OPPONENT");
}
