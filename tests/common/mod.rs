#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tiny_http::{Header, Response, Server};

/// A canned reply: status, content type, body
pub type Reply = (u16, &'static str, Vec<u8>);

/// Local HTTP server that counts requests per path.
pub struct TestServer {
    pub base: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

/// Serve `route(base, path)` on an ephemeral port; unknown paths get 404.
pub fn serve<F>(route: F) -> TestServer
where
    F: Fn(&str, &str) -> Option<Reply> + Send + 'static,
{
    let server = Server::http("127.0.0.1:0").unwrap();
    let base = format!("http://{}", server.server_addr());
    let hits: Arc<Mutex<HashMap<String, usize>>> = Arc::default();

    let thread_base = base.clone();
    let thread_hits = hits.clone();
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let path = request.url().split('?').next().unwrap_or("").to_string();
            *thread_hits.lock().unwrap().entry(path.clone()).or_default() += 1;

            let (status, content_type, body) =
                route(&thread_base, &path).unwrap_or((404, "text/plain", b"not found".to_vec()));
            let resp = Response::from_data(body)
                .with_status_code(status)
                .with_header(format!("Content-Type: {}", content_type).parse::<Header>().unwrap());
            let _ = request.respond(resp);
        }
    });

    TestServer { base, hits }
}

/// Module that answers every `typeset` call with a fixed 4×2 SVG.
pub const TYPESET_WAT: &str = r#"(module
  (memory (export "memory") 1)
  (data (i32.const 1024) "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"4\" height=\"2\"/>")
  (func (export "alloc") (param i32) (result i32) (i32.const 4096))
  (func (export "typeset") (param i32 i32) (result i64)
    (i64.or (i64.shl (i64.const 1024) (i64.const 32)) (i64.const 62))))"#;

/// Module whose `echo` entry returns its input unchanged.
pub const ECHO_WAT: &str = r#"(module
  (memory (export "memory") 1)
  (func (export "alloc") (param i32) (result i32) (i32.const 64))
  (func (export "echo") (param $ptr i32) (param $len i32) (result i64)
    (i64.or
      (i64.shl (i64.extend_i32_u (local.get $ptr)) (i64.const 32))
      (i64.extend_i32_u (local.get $len)))))"#;

/// Width and height from a PNG's IHDR chunk.
pub fn png_size(png: &[u8]) -> (u32, u32) {
    assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    (
        u32::from_be_bytes(png[16..20].try_into().unwrap()),
        u32::from_be_bytes(png[20..24].try_into().unwrap()),
    )
}

/// Write an executable shell script standing in for a browser binary.
#[cfg(unix)]
pub fn fake_browser(dir: &std::path::Path) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let exe = dir.join("chromium");
    std::fs::write(
        &exe,
        "#!/bin/sh\nfor a in \"$@\"; do case \"$a\" in --screenshot=*) printf '\\211PNG\\r\\n\\032\\nfake' > \"${a#--screenshot=}\";; esac; done\n",
    )
    .unwrap();
    std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
    exe
}
