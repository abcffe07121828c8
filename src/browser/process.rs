//! Terminate a process together with every descendant it spawned

use std::collections::HashMap;
use std::process::{Command, Stdio};

use crate::{Error, Result};

/// Parse the `ppid` field of a `/proc/<pid>/stat` line. The command name is
/// parenthesised and may itself contain spaces or parentheses.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_stat_ppid(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// `(pid, ppid)` for every visible process.
#[cfg(target_os = "linux")]
fn process_table() -> Vec<(u32, u32)> {
    let Ok(dir) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    dir.filter_map(|entry| {
        let entry = entry.ok()?;
        let pid: u32 = entry.file_name().to_str()?.parse().ok()?;
        let stat = std::fs::read_to_string(entry.path().join("stat")).ok()?;
        Some((pid, parse_stat_ppid(&stat)?))
    })
    .collect()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn process_table() -> Vec<(u32, u32)> {
    let Ok(out) = Command::new("ps").args(["-A", "-o", "pid=", "-o", "ppid="]).output() else {
        return Vec::new();
    };
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .filter_map(|line| {
            let mut it = line.split_whitespace();
            Some((it.next()?.parse().ok()?, it.next()?.parse().ok()?))
        })
        .collect()
}

/// Every descendant of `root`, parents before children.
pub fn descendants_in(root: u32, table: &[(u32, u32)]) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for &(pid, ppid) in table {
        if pid != ppid {
            children.entry(ppid).or_default().push(pid);
        }
    }

    let mut out = Vec::new();
    let mut queue = vec![root];
    while let Some(pid) = queue.pop() {
        if let Some(kids) = children.get(&pid) {
            for &kid in kids {
                if kid != root && !out.contains(&kid) {
                    out.push(kid);
                    queue.push(kid);
                }
            }
        }
    }
    out
}

/// Kill `pid` and its whole tree.
///
/// The tree is snapshotted before any signal is sent so children reparented
/// by the root's death are still reached. A process that is already gone is
/// not an error.
#[cfg(unix)]
pub fn kill_tree(pid: u32) -> Result<()> {
    let mut targets = descendants_in(pid, &process_table());
    targets.reverse();
    targets.push(pid);
    log::debug!("terminating process tree of {}: {:?}", pid, targets);

    let status = Command::new("kill")
        .arg("-KILL")
        .args(targets.iter().map(|p| p.to_string()))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| Error::Process(format!("failed to run kill: {}", e)))?;
    if !status.success() {
        // Non-zero when some target already exited.
        log::debug!("kill for tree of {} exited with {}", pid, status);
    }
    Ok(())
}

/// Kill every member of the process group led by `pgid`. Reaches children
/// that were already reparented away from the leader.
#[cfg(unix)]
pub fn kill_group(pgid: u32) -> Result<()> {
    let status = Command::new("kill")
        .args(["-KILL", "--", &format!("-{}", pgid)])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| Error::Process(format!("failed to run kill: {}", e)))?;
    if !status.success() {
        log::debug!("kill for group {} exited with {}", pgid, status);
    }
    Ok(())
}

/// Kill a child spawned as its own process-group leader, along with
/// everything it started.
pub fn terminate(pid: u32) -> Result<()> {
    kill_tree(pid)?;
    #[cfg(unix)]
    kill_group(pid)?;
    Ok(())
}

#[cfg(windows)]
pub fn kill_tree(pid: u32) -> Result<()> {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| Error::Process(format!("failed to run taskkill: {}", e)))?;
    if !status.success() {
        log::debug!("taskkill for tree of {} exited with {}", pid, status);
    }
    Ok(())
}

/// Whether `pid` is a live (non-zombie) process.
#[cfg(all(test, target_os = "linux"))]
pub(crate) fn is_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => {
            let state = stat.rfind(')').and_then(|i| stat[i + 1..].split_whitespace().next());
            !matches!(state, Some("Z") | Some("X") | None)
        }
        Err(_) => false,
    }
}

/// Poll until `pid` is gone or `within` elapses.
#[cfg(all(test, target_os = "linux"))]
pub(crate) fn wait_gone(pid: u32, within: std::time::Duration) -> bool {
    let deadline = std::time::Instant::now() + within;
    while std::time::Instant::now() < deadline {
        if !is_running(pid) {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(25));
    }
    !is_running(pid)
}

/// Wait for a pid written to `path` by a helper script.
#[cfg(all(test, target_os = "linux"))]
pub(crate) fn read_pid(path: &std::path::Path) -> u32 {
    for _ in 0..200 {
        if let Some(pid) = std::fs::read_to_string(path).ok().and_then(|s| s.trim().parse().ok()) {
            return pid;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    panic!("no pid written to {}", path.display());
}
