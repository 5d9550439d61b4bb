//! End-to-end tests against a real listener.

use std::net::SocketAddr;

use reqwest::{Client, Method, StatusCode};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;
use uuid::Uuid;

use webfs::http_server::{self, Config};
use webfs::store::{StagingArea, Store};
use webfs::ServiceState;

struct TestServer {
    addr: SocketAddr,
    client: Client,
    root: TempDir,
    shutdown_tx: watch::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let root = TempDir::new().unwrap();
        let staging = StagingArea::new(Some(root.path())).unwrap();
        let state = ServiceState::new(Store::new(root.path().to_path_buf(), staging));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = Config::new(addr, 1024 * 1024);
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let handle = tokio::spawn(async move {
            http_server::serve(listener, config, state, shutdown_rx)
                .await
                .unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            root,
            shutdown_tx,
            handle,
        }
    }

    fn url(&self, name: &str) -> String {
        format!("http://{}/{}", self.addr, name)
    }

    async fn stop(self) {
        self.shutdown_tx.send(()).unwrap();
        self.handle.await.unwrap();
    }
}

fn random_name() -> String {
    Uuid::new_v4().simple().to_string()
}

#[tokio::test]
async fn test_upload_and_get_file() {
    let server = TestServer::start().await;
    let name = random_name();
    let body = random_name().into_bytes();

    let resp = server
        .client
        .post(server.url(&name))
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.bytes().await.unwrap(), body);

    let resp = server.client.get(server.url(&name)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-type"],
        "application/octet-stream"
    );
    assert_eq!(resp.headers()["content-disposition"], "attachment");
    assert_eq!(resp.bytes().await.unwrap(), body);

    server.stop().await;
}

#[tokio::test]
async fn test_delete_file() {
    let server = TestServer::start().await;
    let name = random_name();

    let resp = server
        .client
        .put(server.url(&name))
        .body("to be deleted")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = server.client.delete(server.url(&name)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!server.root.path().join(&name).exists());

    let resp = server.client.get(server.url(&name)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn test_get_nonexisting_file() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .get(server.url("this file does not exist"))
        .send()
        .await
        .unwrap();
    assert_ne!(resp.status(), StatusCode::OK);
    assert!(!server.root.path().join("this file does not exist").exists());

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_method() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .request(Method::OPTIONS, server.url("anything"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_see_identical_bytes() {
    let server = TestServer::start().await;
    let name = random_name();
    let body: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();

    server
        .client
        .put(server.url(&name))
        .body(body.clone())
        .send()
        .await
        .unwrap();

    let mut readers = Vec::new();
    for _ in 0..16 {
        let client = server.client.clone();
        let url = server.url(&name);
        readers.push(tokio::spawn(async move {
            let resp = client.get(url).send().await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            resp.bytes().await.unwrap().to_vec()
        }));
    }

    for reader in readers {
        assert_eq!(reader.await.unwrap(), body);
    }

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writes_are_never_observed_partially() {
    let server = TestServer::start().await;
    let name = random_name();
    let size = 256 * 1024;

    server
        .client
        .put(server.url(&name))
        .body(vec![b'a'; size])
        .send()
        .await
        .unwrap();

    let writer = {
        let client = server.client.clone();
        let url = server.url(&name);
        tokio::spawn(async move {
            for round in 0..10u8 {
                let fill = if round % 2 == 0 { b'b' } else { b'a' };
                let resp = client.put(&url).body(vec![fill; size]).send().await.unwrap();
                assert_eq!(resp.status(), StatusCode::OK);
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..4 {
        let client = server.client.clone();
        let url = server.url(&name);
        readers.push(tokio::spawn(async move {
            for _ in 0..10 {
                let content = client.get(&url).send().await.unwrap().bytes().await.unwrap();
                assert_eq!(content.len(), size);
                assert!(content.iter().all(|b| *b == content[0]));
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    server.stop().await;
}
