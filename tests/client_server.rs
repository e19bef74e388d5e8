//! End-to-end tests: the pooled client against live listeners.

use bytes::Bytes;
use shardkv::client::{Client, ClientError};
use shardkv::commands::{CommandHandler, Reply};
use shardkv::config::ConnectionLimits;
use shardkv::connection::{serve, serve_text, ConnectionStats};
use shardkv::storage::CacheEngine;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// == Helper Functions ==

struct TestServer {
    binary: SocketAddr,
    text: SocketAddr,
    engine: Arc<CacheEngine>,
    stats: Arc<ConnectionStats>,
}

async fn start_server() -> TestServer {
    let engine = Arc::new(CacheEngine::new());
    let handler = CommandHandler::new(Arc::clone(&engine));
    let stats = Arc::new(ConnectionStats::new());

    let binary = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let text = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = TestServer {
        binary: binary.local_addr().unwrap(),
        text: text.local_addr().unwrap(),
        engine,
        stats: Arc::clone(&stats),
    };

    tokio::spawn(serve(
        binary,
        handler.clone(),
        Arc::clone(&stats),
        ConnectionLimits::default(),
        None,
    ));
    tokio::spawn(serve_text(
        text,
        handler,
        stats,
        ConnectionLimits::default(),
    ));
    server
}

async fn ncat(addr: SocketAddr, command: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(command.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    out
}

fn string(value: &str) -> Reply {
    Reply::String(Bytes::from(value.to_owned()))
}

// == Value Types ==

#[tokio::test]
async fn test_string_list_dict_round_trip() {
    let server = start_server().await;
    let client = Client::new(server.binary.to_string());

    client.execute("SET greeting hello world").await.unwrap();
    assert_eq!(client.execute("GET greeting").await.unwrap(), string("hello world"));

    client.execute("SETLIST fruits apple pear plum").await.unwrap();
    assert_eq!(
        client.execute("GETLIST fruits").await.unwrap(),
        Reply::List(vec![
            Bytes::from("apple"),
            Bytes::from("pear"),
            Bytes::from("plum")
        ])
    );
    assert_eq!(client.execute("GETLISTELEM fruits 2").await.unwrap(), string("plum"));

    client
        .execute("SETDICT dict foo:baz fooo:baz baz:foobaz zbaz:world bar:BAR c:hello d:hello")
        .await
        .unwrap();
    assert_eq!(client.execute("GETDICTELEM dict zbaz").await.unwrap(), string("world"));
    assert_eq!(client.execute("GETDICTELEM dict bar").await.unwrap(), string("BAR"));

    let Reply::Dict(entries) = client.execute("GETDICT dict").await.unwrap() else {
        panic!("expected a dictionary");
    };
    let keys: Vec<&[u8]> = entries.iter().map(|(k, _)| &k[..]).collect();
    assert_eq!(
        keys,
        vec![&b"bar"[..], b"baz", b"c", b"d", b"foo", b"fooo", b"zbaz"]
    );
}

#[tokio::test]
async fn test_not_found_and_errors() {
    let server = start_server().await;
    let client = Client::new(server.binary.to_string());

    assert!(matches!(client.execute("GET nobody").await, Err(ClientError::NotFound)));

    client.execute("SETLIST fruits apple").await.unwrap();
    assert!(matches!(
        client.execute("GETLISTELEM fruits 1").await,
        Err(ClientError::NotFound)
    ));

    match client.execute("GET fruits").await {
        Err(ClientError::Server(message)) => {
            assert_eq!(message, "incorrect key type: expected string, found list")
        }
        other => panic!("expected a server error, got {:?}", other),
    }

    match client.execute("SETDICT d novalue").await {
        Err(ClientError::Server(message)) => {
            assert_eq!(message, "incorrect dictionary element, expected key:value")
        }
        other => panic!("expected a server error, got {:?}", other),
    }

    // removing an absent key is fine
    assert_eq!(client.execute("REMOVE nobody").await.unwrap(), Reply::None);

    // errors do not cost the connection
    assert_eq!(server.stats.connections_accepted.load(Ordering::Relaxed), 1);
}

// == Expiry ==

#[tokio::test]
async fn test_ttl_expiry() {
    let server = start_server().await;
    let client = Client::new(server.binary.to_string());

    client.execute("SET short 1 gone soon").await.unwrap();
    client.execute("SET long 100 still here").await.unwrap();
    assert_eq!(client.execute("GET short").await.unwrap(), string("gone soon"));

    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert!(matches!(client.execute("GET short").await, Err(ClientError::NotFound)));
    assert_eq!(client.execute("GET long").await.unwrap(), string("still here"));
    assert_eq!(server.engine.stats().expired, 1);
}

// == Concurrency ==

#[tokio::test]
async fn test_concurrent_clients_share_a_pool() {
    let server = start_server().await;
    let client = Client::new(server.binary.to_string());

    let tasks: Vec<_> = (0..8)
        .map(|t| {
            let client = client.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    let key = format!("key:{}:{}", t, i);
                    client.execute(&format!("SET {} v{}", key, i)).await.unwrap();
                    assert_eq!(
                        client.execute(&format!("GET {}", key)).await.unwrap(),
                        Reply::String(Bytes::from(format!("v{}", i)))
                    );
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(server.engine.len(), 400);
    assert!(client.idle_connections() <= 8);
    assert!(server.stats.connections_accepted.load(Ordering::Relaxed) <= 8);
}

// == Listeners Share One Engine ==

#[tokio::test]
async fn test_binary_and_text_listeners_agree() {
    let server = start_server().await;
    let client = Client::new(server.binary.to_string());

    client.execute("SETDICT user name:Ariz lang:rust").await.unwrap();
    assert_eq!(ncat(server.text, "GETDICTELEM user lang").await, "rust");

    assert_eq!(ncat(server.text, "SETLIST colors red green\n").await, "");
    assert_eq!(
        client.execute("GETLISTELEM colors 1").await.unwrap(),
        string("green")
    );

    let Reply::List(mut keys) = client.execute("KEYS").await.unwrap() else {
        panic!("expected a list of keys");
    };
    keys.sort();
    assert_eq!(keys, vec![Bytes::from("colors"), Bytes::from("user")]);
}
