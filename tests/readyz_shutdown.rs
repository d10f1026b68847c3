#![cfg(unix)]

use assert_cmd::prelude::*;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use reqwest::blocking::Client;
use std::io::{BufRead, BufReader, Read};
use std::net::TcpListener;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_tungstenite::tungstenite::{self, Message};
use wait_timeout::ChildExt;

/// A running daemon and the address its HTTP surface bound to.
struct Archive {
    child: Child,
    http: String,
    _dir: TempDir,
}

impl Archive {
    /// Starts the binary in a fresh directory holding `config` as archive.toml.
    fn start(config: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("archive.toml"), config).unwrap();

        let mut child = Command::cargo_bin("travis-archive")
            .unwrap()
            .current_dir(dir.path())
            .env("RUST_LOG", "warn")
            .env_remove("PUSHER_TOKEN")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to spawn travis-archive");

        let stdout = child.stdout.take().unwrap();
        let http = BufReader::new(stdout)
            .lines()
            .map_while(Result::ok)
            .find_map(|line| line.strip_prefix("listening on ").map(str::to_string))
            .expect("daemon never reported its HTTP address");

        Self {
            child,
            http,
            _dir: dir,
        }
    }

    fn readyz(&self) -> String {
        format!("http://{}/readyz", self.http)
    }

    fn signal(&self, sig: Signal) {
        kill(Pid::from_raw(self.child.id() as i32), sig).expect("failed to signal daemon");
    }

    fn wait(&mut self, limit: Duration) -> ExitStatus {
        match self.child.wait_timeout(limit).expect("wait_timeout failed") {
            Some(status) => status,
            None => {
                let _ = self.child.kill();
                panic!("daemon still running after {limit:?}");
            }
        }
    }

    fn stderr(&mut self) -> String {
        let mut out = String::new();
        if let Some(mut err) = self.child.stderr.take() {
            let _ = err.read_to_string(&mut out);
        }
        out
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

fn eventually_status(url: &str, want: u16, limit: Duration) -> bool {
    let client = Client::new();
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        let status = client.get(url).send().map(|r| r.status().as_u16());
        if status.ok() == Some(want) {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

fn config(pusher_host: &str, drain_grace_ms: u64) -> String {
    format!(
        r#"[http]
bind = "127.0.0.1:0"

[pusher]
key = "test-key"
host = "{pusher_host}"
secure = false

[store]
host = "127.0.0.1"
port = 9

[health]
drain_grace_ms = {drain_grace_ms}
"#
    )
}

/// Accepts one websocket client, greets it, then refuses its app key.
fn refuse_app_key(listener: TcpListener) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut ws = tungstenite::accept(stream).unwrap();
        ws.send(Message::text(
            r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"1.2\",\"activity_timeout\":120}"}"#,
        ))
        .unwrap();
        ws.send(Message::text(
            r#"{"event":"pusher:error","data":{"code":4001,"message":"App key not in this cluster"}}"#,
        ))
        .unwrap();
        while ws.read().is_ok() {}
    })
}

#[test]
fn sigterm_drains_before_exit() {
    // nothing is required by default, so the daemon is ready while pusher and
    // the store are both unreachable
    let mut archive = Archive::start(&config("127.0.0.1:9", 1500));
    let readyz = archive.readyz();
    assert!(
        eventually_status(&readyz, 200, Duration::from_secs(5)),
        "readyz never reported ready"
    );

    archive.signal(Signal::SIGTERM);
    assert!(
        eventually_status(&readyz, 503, Duration::from_secs(5)),
        "readyz kept reporting ready while draining"
    );

    let status = archive.wait(Duration::from_secs(5));
    assert!(
        status.success() || status.signal().is_some(),
        "unexpected exit status: {status:?}"
    );
}

#[test]
fn rejected_app_key_exits_with_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let pusher = listener.local_addr().unwrap().to_string();
    let server = refuse_app_key(listener);

    let mut archive = Archive::start(&config(&pusher, 0));
    let status = archive.wait(Duration::from_secs(10));
    assert!(!status.success(), "daemon accepted a refused key: {status:?}");

    let stderr = archive.stderr();
    assert!(stderr.contains("4001"), "{stderr}");
    server.join().unwrap();
}
