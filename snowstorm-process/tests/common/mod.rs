//! Shell-script stand-ins for the server and client binaries.
//!
//! All scripts are written once per test binary, before any test spawns a
//! process, so no child can inherit a script's write handle and make it
//! fail with "text file busy".

#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use snowstorm_core::config::{
    ClientConfig, DumpConfig, OutputCapture, ServerConfig, WorkloadConfig,
};
use std::os::unix::fs::PermissionsExt;
use std::sync::OnceLock;
use tempfile::TempDir;

pub struct Fixtures {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Fixtures {
    pub fn script(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }

    pub fn scratch(&self, name: &str) -> Utf8PathBuf {
        self.root.join("scratch").join(name)
    }
}

const SCRIPTS: &[(&str, &str)] = &[
    // accepts any number of commands and never answers
    ("silent.sh", "exec cat > /dev/null\n"),
    ("exits.sh", "exit 0\n"),
    ("chatty.sh", "while :; do echo tick; sleep 0.01; done\n"),
    ("crash_on_command.sh", "read cmd\nexit 1\n"),
    (
        "dumping_server.sh",
        r#"while read cmd path; do
  case "$cmd" in
    p)
      printf 'Station 0 ["first"] clients:\n\t - 127.0.0.1:10000\n' > "$path.tmp"
      printf 'Station 1 ["second"] clients:\n' >> "$path.tmp"
      mv "$path.tmp" "$path"
      ;;
    q) exit 0 ;;
  esac
done
"#,
    ),
];

pub fn fixtures() -> &'static Fixtures {
    static FIXTURES: OnceLock<Fixtures> = OnceLock::new();
    FIXTURES.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        std::fs::create_dir(root.join("scratch")).unwrap();
        for (name, body) in SCRIPTS {
            let path = root.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        Fixtures { _dir: dir, root }
    })
}

pub fn server_config(script: &str) -> ServerConfig {
    ServerConfig {
        binary: fixtures().script(script),
        stations: vec!["a.mp3".into(), "b.mp3".into(), "c.mp3".into()],
        capture: OutputCapture::Discard,
        ..ServerConfig::default()
    }
}

pub fn client_config(script: &str) -> ClientConfig {
    ClientConfig {
        binary: fixtures().script(script),
        ..ClientConfig::default()
    }
}

pub fn fast_dump(attempts: u32) -> DumpConfig {
    DumpConfig {
        attempts,
        interval_ms: 100,
    }
}

/// A workload with no pacing delays
pub fn quick_workload(clients: usize) -> WorkloadConfig {
    WorkloadConfig {
        clients,
        iterations: 1,
        join_rounds: 1,
        round_delay_ms: 0,
        listen_ms: 0,
        post_kill_delay_ms: 0,
        seed: Some(7),
        ..WorkloadConfig::default()
    }
}
