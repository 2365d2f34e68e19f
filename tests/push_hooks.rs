//! End-to-end coverage of the pre-receive signature gate and the
//! post-receive webhook pipeline, driven through real `git push` runs
//! against the installed hooks.

mod common;

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::time::{Duration, Instant};

use common::{TestServer, commit, generate_key, git_ok, init_work_repo, push_with_hook_env};

#[tokio::test]
async fn signed_push_is_accepted() {
    let server = TestServer::start().await;
    server.admin(&["create-repo", "proj"]);

    let key = generate_key(server.temp_dir.path(), "signer");
    server.admin(&["add-key", "--name", "signer", &key.public_line]);

    let work = server.temp_dir.path().join("work");
    init_work_repo(&work, &key);
    let sha = commit(&work, "first", true);

    let output = push_with_hook_env(&work, &server, "proj", "main");
    assert!(
        output.status.success(),
        "push failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    // The target ref now points at the pushed commit.
    let head = git_ok(&server.repo_path("proj"), &["rev-parse", "refs/heads/main"]);
    assert_eq!(head.trim(), sha);
}

#[tokio::test]
async fn unsigned_push_is_rejected_with_short_sha() {
    let server = TestServer::start().await;
    server.admin(&["create-repo", "proj"]);

    let key = generate_key(server.temp_dir.path(), "signer");
    server.admin(&["add-key", "--name", "signer", &key.public_line]);

    let work = server.temp_dir.path().join("work");
    init_work_repo(&work, &key);
    let sha = commit(&work, "unsigned", false);

    let output = push_with_hook_env(&work, &server, "proj", "main");
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("origin: push rejected"),
        "stderr: {stderr}"
    );
    assert!(stderr.contains(&format!("commit {}", &sha[..7])), "stderr: {stderr}");

    // The ref was never created.
    let refs = git_ok(&server.repo_path("proj"), &["for-each-ref"]);
    assert!(refs.trim().is_empty(), "refs: {refs}");
}

#[tokio::test]
async fn push_signed_by_unregistered_key_is_rejected() {
    let server = TestServer::start().await;
    server.admin(&["create-repo", "proj"]);

    let registered = generate_key(server.temp_dir.path(), "registered");
    server.admin(&["add-key", "--name", "registered", &registered.public_line]);

    // Sign with a different key that the store has never seen.
    let rogue = generate_key(server.temp_dir.path(), "rogue");
    let work = server.temp_dir.path().join("work");
    init_work_repo(&work, &rogue);
    commit(&work, "rogue commit", true);

    let output = push_with_hook_env(&work, &server, "proj", "main");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("origin: push rejected"), "stderr: {stderr}");
}

#[tokio::test]
async fn ref_delete_skips_verification() {
    let server = TestServer::start().await;
    server.admin(&["create-repo", "proj"]);

    let key = generate_key(server.temp_dir.path(), "signer");
    server.admin(&["add-key", "--name", "signer", &key.public_line]);

    let work = server.temp_dir.path().join("work");
    init_work_repo(&work, &key);
    commit(&work, "first", true);
    assert!(push_with_hook_env(&work, &server, "proj", "main").status.success());
    commit(&work, "second", true);
    assert!(
        push_with_hook_env(&work, &server, "proj", "main:refs/heads/scratch")
            .status
            .success()
    );

    // Deleting the branch needs no signatures.
    let output = push_with_hook_env(&work, &server, "proj", ":refs/heads/scratch");
    assert!(
        output.status.success(),
        "delete failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[tokio::test]
async fn new_branch_verifies_only_unique_commits() {
    let server = TestServer::start().await;
    server.admin(&["create-repo", "proj"]);

    let key = generate_key(server.temp_dir.path(), "signer");
    server.admin(&["add-key", "--name", "signer", &key.public_line]);

    let work = server.temp_dir.path().join("work");
    init_work_repo(&work, &key);

    // Seed main with an UNSIGNED base commit while the gate is moved aside.
    // If a new branch push scanned shared history it would trip over it.
    commit(&work, "unsigned base", false);
    let bare = server.repo_path("proj");
    let hook = bare.join("hooks/pre-receive");
    let parked = bare.join("hooks/pre-receive.off");
    std::fs::rename(&hook, &parked).unwrap();
    assert!(push_with_hook_env(&work, &server, "proj", "main").status.success());
    std::fs::rename(&parked, &hook).unwrap();

    git_ok(&work, &["checkout", "-b", "feature"]);
    commit(&work, "signed tip", true);

    let output = push_with_hook_env(&work, &server, "proj", "feature");
    assert!(
        output.status.success(),
        "new-branch push failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Minimal HTTP receiver: captures one request's head + body, then responds.
fn capture_one_request(listener: TcpListener, respond: bool) -> std::thread::JoinHandle<(String, Vec<u8>)> {
    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();

        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut head = String::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).expect("read header line");
            if line == "\r\n" || line.is_empty() {
                break;
            }
            head.push_str(&line);
        }

        let content_length = head
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);

        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).expect("read body");

        if respond {
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
        } else {
            // Hold the connection open well past the delivery timeout.
            std::thread::sleep(Duration::from_secs(30));
        }

        (head, body)
    })
}

#[tokio::test]
async fn webhook_delivery_carries_hmac_signature() {
    let server = TestServer::start().await;
    server.admin(&["create-repo", "proj"]);

    let key = generate_key(server.temp_dir.path(), "signer");
    server.admin(&["add-key", "--name", "signer", &key.public_line]);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let hook_url = format!("http://{}/hook", listener.local_addr().unwrap());
    let receiver = capture_one_request(listener, true);

    server.admin(&[
        "add-webhook",
        "proj",
        "--url",
        &hook_url,
        "--secret",
        "topsecret",
    ]);

    let work = server.temp_dir.path().join("work");
    init_work_repo(&work, &key);
    let sha = commit(&work, "first", true);
    assert!(push_with_hook_env(&work, &server, "proj", "main").status.success());

    let (head, body) = receiver.join().expect("receiver thread");

    // HTTP/1.1 header names arrive lowercased; compare accordingly.
    let head_lower = head.to_lowercase();
    assert!(head.contains("POST /hook"), "head: {head}");
    assert!(
        head_lower.contains("content-type: application/json"),
        "head: {head}"
    );
    assert!(head_lower.contains("x-origin-event: push"), "head: {head}");
    assert!(
        head_lower.contains("user-agent: origin-webhook/1.0"),
        "head: {head}"
    );

    // Signature matches HMAC-SHA256 over the literal body bytes.
    let expected = format!("sha256={}", origin::webhook::sign(b"topsecret", &body));
    assert!(
        head_lower.contains(&format!("x-origin-signature: {expected}")),
        "head: {head}"
    );

    let event: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(event["event"], "push");
    assert_eq!(event["repository"], "proj");
    assert_eq!(event["ref"], "refs/heads/main");
    assert_eq!(event["after"], sha);
    assert_eq!(event["pusher"], "SHA256:test-pusher");
}

#[tokio::test]
async fn webhook_without_secret_omits_signature_header() {
    let server = TestServer::start().await;
    server.admin(&["create-repo", "proj"]);

    let key = generate_key(server.temp_dir.path(), "signer");
    server.admin(&["add-key", "--name", "signer", &key.public_line]);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let hook_url = format!("http://{}/hook", listener.local_addr().unwrap());
    let receiver = capture_one_request(listener, true);

    server.admin(&["add-webhook", "proj", "--url", &hook_url]);

    let work = server.temp_dir.path().join("work");
    init_work_repo(&work, &key);
    commit(&work, "first", true);
    assert!(push_with_hook_env(&work, &server, "proj", "main").status.success());

    let (head, _body) = receiver.join().expect("receiver thread");
    assert!(
        !head.to_lowercase().contains("x-origin-signature"),
        "head: {head}"
    );
}

#[tokio::test]
async fn slow_webhook_cannot_stall_the_push() {
    let server = TestServer::start().await;
    server.admin(&["create-repo", "proj"]);

    let key = generate_key(server.temp_dir.path(), "signer");
    server.admin(&["add-key", "--name", "signer", &key.public_line]);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let hook_url = format!("http://{}/hook", listener.local_addr().unwrap());
    // The receiver reads the request but never responds.
    let _receiver = capture_one_request(listener, false);

    server.admin(&["add-webhook", "proj", "--url", &hook_url]);

    let work = server.temp_dir.path().join("work");
    init_work_repo(&work, &key);
    commit(&work, "first", true);

    let start = Instant::now();
    let output = push_with_hook_env(&work, &server, "proj", "main");
    assert!(output.status.success());
    assert!(
        start.elapsed() < Duration::from_secs(8),
        "push (incl. post-receive) took {:?}",
        start.elapsed()
    );
}
