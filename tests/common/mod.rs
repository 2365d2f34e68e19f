#![allow(dead_code)]

use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::LazyLock;

use tempfile::TempDir;

static BUILD_RELEASE: LazyLock<PathBuf> = LazyLock::new(|| {
    let build_status = Command::new("cargo")
        .args(["build", "--release"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("build release binary");
    assert!(build_status.success(), "Failed to build release binary");
    Path::new(env!("CARGO_MANIFEST_DIR")).join("target/release/origin")
});

pub fn origin_binary() -> PathBuf {
    BUILD_RELEASE.clone()
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

pub struct TestServer {
    pub temp_dir: TempDir,
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub base_url: String,
    pub ssh_port: u16,
    server_process: Option<Child>,
}

impl TestServer {
    pub async fn start() -> Self {
        let binary = origin_binary();

        let temp_dir = TempDir::new().expect("create temp dir");
        let data_dir = temp_dir.path().join("data");
        let http_port = free_port();
        let ssh_port = free_port();

        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            format!(
                "name: Origin Test\n\
                 data_path: {}\n\
                 ssh:\n  listen_addr: \"127.0.0.1:{ssh_port}\"\n\
                 http:\n  listen_addr: \"127.0.0.1:{http_port}\"\n  public_url: \"http://127.0.0.1:{http_port}\"\n",
                data_dir.display()
            ),
        )
        .expect("write config");

        let base_url = format!("http://127.0.0.1:{http_port}");

        let server_process = Command::new(&binary)
            .arg("--config")
            .arg(&config_path)
            .arg("serve")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("start server");

        Self::wait_for_ready(&base_url).await;

        Self {
            temp_dir,
            config_path,
            data_dir,
            base_url,
            ssh_port,
            server_process: Some(server_process),
        }
    }

    async fn wait_for_ready(base_url: &str) {
        let client = reqwest::Client::new();
        for _ in 0..100 {
            if client
                .get(format!("{base_url}/health"))
                .send()
                .await
                .is_ok()
            {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        panic!("Server did not become ready");
    }

    /// Run an `origin admin …` command against this server's data directory
    /// and assert it succeeded.
    pub fn admin(&self, args: &[&str]) -> Output {
        let output = Command::new(origin_binary())
            .arg("--config")
            .arg(&self.config_path)
            .arg("admin")
            .args(args)
            .output()
            .expect("run admin command");
        assert!(
            output.status.success(),
            "admin {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        output
    }

    pub fn repo_path(&self, name: &str) -> PathBuf {
        self.data_dir.join("repos").join(format!("{name}.git"))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(mut process) = self.server_process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

// --- git helpers -----------------------------------------------------------

pub fn git(dir: &Path, args: &[&str]) -> Output {
    Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .expect("run git")
}

pub fn git_ok(dir: &Path, args: &[&str]) -> String {
    let output = git(dir, args);
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// An Ed25519 keypair for commit signing and SSH auth in tests.
pub struct TestKey {
    pub private_path: PathBuf,
    pub public_path: PathBuf,
    pub public_line: String,
}

pub fn generate_key(dir: &Path, name: &str) -> TestKey {
    let private_path = dir.join(name);
    let output = Command::new("ssh-keygen")
        .args(["-t", "ed25519", "-N", "", "-q", "-f"])
        .arg(&private_path)
        .output()
        .expect("run ssh-keygen");
    assert!(
        output.status.success(),
        "ssh-keygen failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let public_path = dir.join(format!("{name}.pub"));
    let public_line = fs::read_to_string(&public_path)
        .expect("read public key")
        .trim()
        .to_string();

    TestKey {
        private_path,
        public_path,
        public_line,
    }
}

/// Create a working repository configured to sign commits with `key`.
pub fn init_work_repo(path: &Path, key: &TestKey) {
    fs::create_dir_all(path).expect("create work dir");
    let output = Command::new("git")
        .args(["init", "-b", "main"])
        .arg(path)
        .output()
        .expect("git init");
    assert!(output.status.success());

    git_ok(path, &["config", "user.name", "Test Pusher"]);
    git_ok(path, &["config", "user.email", "pusher@example.com"]);
    git_ok(path, &["config", "gpg.format", "ssh"]);
    git_ok(
        path,
        &[
            "config",
            "user.signingkey",
            &key.private_path.display().to_string(),
        ],
    );
}

pub fn commit(work: &Path, message: &str, signed: bool) -> String {
    fs::write(work.join("file.txt"), message).expect("write file");
    git_ok(work, &["add", "."]);
    if signed {
        git_ok(work, &["commit", "-S", "-m", message]);
    } else {
        git_ok(work, &["commit", "--no-gpg-sign", "-m", message]);
    }
    git_ok(work, &["rev-parse", "HEAD"]).trim().to_string()
}

/// Push over the file transport with the hook environment the SSH front-end
/// would inject, so the installed pre/post-receive chain runs for real.
pub fn push_with_hook_env(
    work: &Path,
    server: &TestServer,
    repo_name: &str,
    refspec: &str,
) -> Output {
    let bare = server.repo_path(repo_name);
    Command::new("git")
        .arg("-C")
        .arg(work)
        .arg("push")
        .arg(&bare)
        .arg(refspec)
        .env("ORIGIN_DATA_PATH", &server.data_dir)
        .env("ORIGIN_REPO_NAME", repo_name)
        .env("ORIGIN_REPO_PATH", &bare)
        .env("ORIGIN_PUSHER_KEY_FINGERPRINT", "SHA256:test-pusher")
        .output()
        .expect("git push")
}
