use std::time::{Duration, Instant};

use http_types::{Method, Request, StatusCode};
use pretty_assertions::assert_eq;
use tick_h1::{Client, Error, Phase, ReasonPhrase, State};

mod common;

use common::{body_string, config, drive, pause, write, Step, TestServer};

#[test]
fn get_ok() {
    let server = TestServer::respond("HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello");
    let mut client = Client::new(config());

    assert!(client.send(Request::new(Method::Get, server.url("/"))).unwrap());
    assert_eq!(client.state(), State::WaitWrite);
    drive(&mut client).unwrap();
    assert!(client.is_done());
    assert_eq!(client.status(), Some(200));

    let mut res = client.response().unwrap();
    assert_eq!(res.status(), StatusCode::Ok);
    assert_eq!(
        res.ext().get::<ReasonPhrase>(),
        Some(&ReasonPhrase("OK".into()))
    );
    assert_eq!(body_string(&mut res), "hello");
}

#[test]
fn client_error_carries_response() {
    let server = TestServer::respond(
        "HTTP/1.1 404 Not Found\r\ncontent-length: 9\r\nx-trace: abc\r\n\r\nnot here!",
    );
    let mut client = Client::new(config());
    client.send(Request::new(Method::Get, server.url("/missing"))).unwrap();
    drive(&mut client).unwrap();

    let err = client.response().unwrap_err();
    assert!(matches!(err, Error::ClientStatus(_)));
    let mut res = err.into_response().unwrap();
    assert_eq!(res.status(), StatusCode::NotFound);
    assert_eq!(res["x-trace"], "abc");
    assert_eq!(body_string(&mut res), "not here!");
}

#[test]
fn server_error_carries_response() {
    let server = TestServer::respond(
        "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 4\r\n\r\nbusy",
    );
    let mut client = Client::new(config());
    client.send(Request::new(Method::Get, server.url("/"))).unwrap();
    drive(&mut client).unwrap();

    let err = client.response().unwrap_err();
    assert!(matches!(err, Error::ServerStatus(_)));
    assert_eq!(err.response().unwrap().status(), StatusCode::ServiceUnavailable);
}

#[test]
fn response_before_done() {
    let server = TestServer::new(vec![vec![Step::Read, pause(500)]]);
    let mut client = Client::new(config());
    assert!(matches!(client.response(), Err(Error::NotDone)));

    client.send(Request::new(Method::Get, server.url("/"))).unwrap();
    assert!(matches!(client.response(), Err(Error::NotDone)));
}

#[test]
fn second_send_while_busy_is_rejected() {
    let server = TestServer::new(vec![vec![
        Step::Read,
        pause(100),
        write("HTTP/1.1 204 No Content\r\n\r\n"),
    ]]);
    let mut client = Client::new(config());
    assert!(client.send(Request::new(Method::Get, server.url("/a"))).unwrap());
    assert!(!client.send(Request::new(Method::Get, server.url("/b"))).unwrap());

    drive(&mut client).unwrap();
    let requests = server.finish();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with(b"GET /a HTTP/1.1\r\n"));
}

#[test]
fn keep_alive_reuses_connection() {
    let server = TestServer::new(vec![vec![
        Step::Read,
        write("HTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\none"),
        Step::Read,
        write("HTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\ntwo"),
    ]]);
    let mut client = Client::new(config());

    client.send(Request::new(Method::Get, server.url("/1"))).unwrap();
    drive(&mut client).unwrap();
    assert_eq!(body_string(&mut client.response().unwrap()), "one");
    assert!(client.has_connection());

    client.send(Request::new(Method::Get, server.url("/2"))).unwrap();
    assert_eq!(client.state(), State::Writing);
    drive(&mut client).unwrap();
    assert_eq!(body_string(&mut client.response().unwrap()), "two");

    let requests = server.finish();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].starts_with(b"GET /2 HTTP/1.1\r\n"));
}

#[test]
fn connection_close_forces_new_socket() {
    let server = TestServer::new(vec![
        vec![
            Step::Read,
            write("HTTP/1.1 200 OK\r\ncontent-length: 3\r\nconnection: close\r\n\r\none"),
        ],
        vec![
            Step::Read,
            write("HTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\ntwo"),
        ],
    ]);
    let mut client = Client::new(config());

    client.send(Request::new(Method::Get, server.url("/1"))).unwrap();
    drive(&mut client).unwrap();
    assert_eq!(body_string(&mut client.response().unwrap()), "one");
    assert!(!client.has_connection());

    client.send(Request::new(Method::Get, server.url("/2"))).unwrap();
    assert_eq!(client.state(), State::WaitWrite);
    drive(&mut client).unwrap();
    assert_eq!(body_string(&mut client.response().unwrap()), "two");
    assert_eq!(server.finish().len(), 2);
}

#[test]
fn close_without_fetching_response_still_reconnects() {
    let server = TestServer::new(vec![
        vec![
            Step::Read,
            write("HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n"),
        ],
        vec![Step::Read, write("HTTP/1.1 204 No Content\r\n\r\n")],
    ]);
    let mut client = Client::new(config());
    client.send(Request::new(Method::Get, server.url("/1"))).unwrap();
    drive(&mut client).unwrap();

    client.send(Request::new(Method::Get, server.url("/2"))).unwrap();
    assert_eq!(client.state(), State::WaitWrite);
    drive(&mut client).unwrap();
    assert_eq!(server.finish().len(), 2);
}

#[test]
fn different_endpoint_forces_new_socket() {
    let first = TestServer::respond("HTTP/1.1 204 No Content\r\n\r\n");
    let second = TestServer::respond("HTTP/1.1 204 No Content\r\n\r\n");
    let mut client = Client::new(config());

    client.send(Request::new(Method::Get, first.url("/"))).unwrap();
    drive(&mut client).unwrap();
    client.response().unwrap();
    assert!(client.has_connection());

    client.send(Request::new(Method::Get, second.url("/"))).unwrap();
    assert_eq!(client.state(), State::WaitWrite);
    drive(&mut client).unwrap();
    assert_eq!(second.finish().len(), 1);
}

#[test]
fn silent_server_times_out() {
    let server = TestServer::new(vec![vec![
        Step::Read,
        write("HTTP/1.1 200 OK\r\ncontent-length: 10\r\n\r\nhal"),
        pause(3000),
    ]]);
    let mut client = Client::new(config().with_read_timeout(Duration::from_millis(300)));
    client.send(Request::new(Method::Get, server.url("/"))).unwrap();

    let started = Instant::now();
    let err = drive(&mut client).unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err, Error::Timeout(Phase::Read)));
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(client.state(), State::Failed);
    assert!(!client.has_connection());
    assert!(matches!(client.tick(), Err(Error::Failed)));
    assert!(!client.send(Request::new(Method::Get, server.url("/"))).unwrap());
}

#[test]
fn trickling_bytes_keep_the_deadline_alive() {
    let mut script = vec![
        Step::Read,
        write("HTTP/1.1 200 OK\r\ncontent-length: 6\r\n\r\n"),
    ];
    for byte in b"abcdef" {
        script.push(pause(150));
        script.push(write([*byte]));
    }
    let server = TestServer::new(vec![script]);
    let mut client = Client::new(config().with_read_timeout(Duration::from_millis(400)));
    client.send(Request::new(Method::Get, server.url("/"))).unwrap();

    drive(&mut client).unwrap();
    assert_eq!(body_string(&mut client.response().unwrap()), "abcdef");
}

#[test]
fn no_response_times_out_waiting_for_read() {
    let server = TestServer::new(vec![vec![Step::Read, pause(3000)]]);
    let mut client = Client::new(config().with_connect_timeout(Duration::from_millis(200)));
    client.send(Request::new(Method::Get, server.url("/"))).unwrap();

    let err = drive(&mut client).unwrap_err();
    assert!(matches!(err, Error::Timeout(Phase::Write)));
}

#[test]
fn reset_after_failure() {
    let broken = TestServer::respond("HTTP/1.1 OK\r\n\r\n");
    let mut client = Client::new(config());
    client.send(Request::new(Method::Get, broken.url("/"))).unwrap();
    assert!(matches!(drive(&mut client), Err(Error::StatusLine(_))));
    assert_eq!(client.state(), State::Failed);

    client.reset();
    assert_eq!(client.state(), State::Idle);
    assert_eq!(client.status(), None);
    assert!(client.headers().is_empty());

    let server = TestServer::respond("HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok");
    client.send(Request::new(Method::Get, server.url("/"))).unwrap();
    drive(&mut client).unwrap();
    assert_eq!(body_string(&mut client.response().unwrap()), "ok");
}

#[test]
fn refused_connection_is_a_connect_error() {
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let url = http_types::Url::parse(&format!("http://{}/", addr)).unwrap();
    let mut client = Client::new(config());

    let result = client
        .send(Request::new(Method::Get, url))
        .and_then(|_| drive(&mut client));
    assert!(matches!(result, Err(Error::Connect(_))));
    assert_eq!(client.state(), State::Failed);
}

#[test]
fn many_clients_on_one_thread() {
    let servers: Vec<TestServer> = (0..8)
        .map(|i| {
            TestServer::new(vec![vec![
                Step::Read,
                pause(50 * (8 - i)),
                write(format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n{}",
                    i.to_string().len(),
                    i
                )),
            ]])
        })
        .collect();
    let mut clients: Vec<Client> = servers.iter().map(|_| Client::new(config())).collect();
    for (client, server) in clients.iter_mut().zip(&servers) {
        client.send(Request::new(Method::Get, server.url("/"))).unwrap();
    }

    let started = Instant::now();
    while !clients.iter().all(Client::is_done) {
        for client in &mut clients {
            client.tick().unwrap();
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        std::thread::sleep(Duration::from_millis(1));
    }

    for (i, client) in clients.iter_mut().enumerate() {
        assert_eq!(body_string(&mut client.response().unwrap()), i.to_string());
    }
}

#[test]
fn spooled_buffer_file_is_removed_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::respond("HTTP/1.1 200 OK\r\ncontent-length: 6\r\n\r\nspool!");
    let mut client = Client::new(config().with_spooled_buffer(Some(dir.path().to_path_buf())));

    client.send(Request::new(Method::Get, server.url("/"))).unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    drive(&mut client).unwrap();
    assert_eq!(body_string(&mut client.response().unwrap()), "spool!");

    drop(client);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
