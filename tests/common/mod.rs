#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Minimal single-page PDF whose `/Info` dictionary holds `info`.
/// Builds body then xref with correct byte offsets so lopdf can parse it.
pub fn pdf_with_info(info: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(
        b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >> endobj\n",
    );
    let o4 = out.len();
    out.extend_from_slice(format!("4 0 obj << {} >> endobj\n", info).as_bytes());
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 5\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 5 /Root 1 0 R /Info 4 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// A PDF titled "Report" with no author.
pub fn report_pdf() -> Vec<u8> {
    pdf_with_info("/Title (Report) /Producer (baobab tests)")
}

/// Temp workspace with a config pointing both databases inside it.
/// `remote_url` goes into `[remote].url` when given.
pub fn setup_env(remote_url: Option<&str>) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("config")).unwrap();

    let url_line = remote_url
        .map(|u| format!("url = \"{}\"\n", u))
        .unwrap_or_default();
    let config = format!(
        r#"[local]
path = "{root}/data/local.sqlite"

[remote]
path = "{root}/data/remote.sqlite"
{url_line}timeout_secs = 5

[server]
bind = "127.0.0.1:0"

[sync]
retry_errored = true
max_in_flight = 4
"#,
        root = root.display(),
        url_line = url_line,
    );
    let config_path = root.join("config").join("baobab.toml");
    fs::write(&config_path, config).unwrap();
    (tmp, config_path)
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}
