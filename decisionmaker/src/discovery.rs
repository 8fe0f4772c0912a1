//! Pod and process discovery from the kernel process table.
//!
//! Walks a procfs-like tree (one directory per live PID, each with
//! `cgroup`, `comm`, and `stat` files) and extracts, for every process
//! that belongs to a kubernetes pod, the pod UID and container ID encoded
//! in its cgroup hierarchy path.

use std::{
    collections::{BTreeMap, HashSet},
    path::PathBuf,
    sync::OnceLock,
};

use anyhow::{Context, Result};
use regex::Regex;

const CONTAINER_PREFIX: &str = "cri-containerd-";
const CONTAINER_SUFFIX: &str = ".scope";

fn pod_segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"pod([0-9a-fA-F_]+)(\.slice)?").expect("valid pod regex"))
}

/// One process backing a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: i32,
    pub command: String,
    pub ppid: i32,
    pub container_id: String,
}

/// All discovered processes of one pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodProcesses {
    pub pod_uid: String,
    pub processes: Vec<ProcessRecord>,
}

pub struct ProcessDiscovery {
    proc_root: PathBuf,
    skip_pids: HashSet<i32>,
}

impl ProcessDiscovery {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            skip_pids: HashSet::new(),
        }
    }

    /// Exclude the given PIDs from scans (typically the agent itself).
    pub fn with_skip_pids(mut self, pids: impl IntoIterator<Item = i32>) -> Self {
        self.skip_pids = pids.into_iter().collect();
        self
    }

    /// Walk the process table once. Per-PID failures (races with process
    /// exit, unreadable files) are logged and skipped; an empty map is a
    /// valid result.
    pub fn scan(&self) -> Result<BTreeMap<String, PodProcesses>> {
        let entries = std::fs::read_dir(&self.proc_root)
            .with_context(|| format!("failed to read {}", self.proc_root.display()))?;

        let mut pods: BTreeMap<String, PodProcesses> = BTreeMap::new();
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let name = entry.file_name();
            let Some(pid) = name.to_str().and_then(|s| s.parse::<i32>().ok()) else {
                continue;
            };
            if pid <= 0 || self.skip_pids.contains(&pid) {
                continue;
            }
            match self.read_process(pid) {
                Ok(Some((pod_uid, record))) => {
                    pods.entry(pod_uid.clone())
                        .or_insert_with(|| PodProcesses {
                            pod_uid,
                            processes: Vec::new(),
                        })
                        .processes
                        .push(record);
                }
                Ok(None) => {}
                Err(e) => {
                    // The process may simply have exited mid-scan.
                    tracing::debug!(pid, "skipping process: {:#}", e);
                }
            }
        }
        Ok(pods)
    }

    fn read_process(&self, pid: i32) -> Result<Option<(String, ProcessRecord)>> {
        let dir = self.proc_root.join(pid.to_string());
        let cgroup = std::fs::read_to_string(dir.join("cgroup")).context("read cgroup")?;

        let Some((pod_uid, container_id)) = parse_cgroup(&cgroup) else {
            return Ok(None);
        };

        let command = std::fs::read_to_string(dir.join("comm"))
            .context("read comm")?
            .trim_end()
            .to_string();
        let stat = std::fs::read_to_string(dir.join("stat")).context("read stat")?;
        let ppid = parse_ppid(&stat).context("parse stat")?;

        Ok(Some((
            pod_uid,
            ProcessRecord {
                pid,
                command,
                ppid,
                container_id,
            },
        )))
    }
}

/// Extract (pod UID, container ID) from a process's cgroup file.
///
/// Only lines mentioning `kubepods` are considered. The third
/// colon-separated field is the hierarchy path; its segments encode the
/// pod UID (underscores for hyphens under systemd) and, for container
/// processes, a `cri-containerd-<id>.scope` segment.
pub fn parse_cgroup(cgroup: &str) -> Option<(String, String)> {
    for line in cgroup.lines() {
        if !line.contains("kubepods") {
            continue;
        }
        let mut fields = line.splitn(3, ':');
        let (_hierarchy, _controller) = (fields.next()?, fields.next()?);
        let Some(path) = fields.next() else { continue };

        let mut pod_uid: Option<String> = None;
        let mut container_id = String::new();
        for segment in path.split('/') {
            if let Some(caps) = pod_segment_re().captures(segment) {
                pod_uid = Some(caps[1].replace('_', "-"));
            }
            if let Some(rest) = segment.strip_prefix(CONTAINER_PREFIX)
                && let Some(id) = rest.strip_suffix(CONTAINER_SUFFIX)
            {
                container_id = id.to_string();
            }
        }
        if let Some(uid) = pod_uid {
            return Some((uid, container_id));
        }
    }
    None
}

/// Field 4 of `/proc/<pid>/stat` is the parent PID.
fn parse_ppid(stat: &str) -> Result<i32> {
    stat.split_whitespace()
        .nth(3)
        .context("stat has fewer than 4 fields")?
        .parse()
        .context("ppid is not an integer")
}
