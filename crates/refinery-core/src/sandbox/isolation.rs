//! OS-level confinement for interpreter children.
//!
//! Applied inside the forked child, after `fork` and before `exec`. On Linux
//! the child enters fresh user, mount, network and IPC namespaces. Every
//! mount is then remounted read-only, and the masked paths are covered by
//! empty read-only tmpfs mounts. Resource limits apply on every Unix. The
//! interpreter holds no capabilities once it has been exec'd, so candidate
//! code cannot undo any of this.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How strictly namespace confinement is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// Refuse to run a candidate the host cannot confine.
    #[default]
    Required,
    /// Confine when the host allows it, otherwise fall back to resource
    /// limits alone.
    BestEffort,
    /// Resource limits only.
    Disabled,
}

/// `setrlimit` ceilings for each child. `None` keeps the inherited limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Address-space ceiling (MiB).
    pub memory_mb: Option<u64>,
    /// Largest file the child may write (bytes).
    pub max_file_bytes: Option<u64>,
    pub max_open_files: Option<u64>,
    /// `RLIMIT_NPROC` counts every process of the user id on the host; only
    /// meaningful when sandboxes run under a dedicated account.
    pub max_processes: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: Some(1024),
            max_file_bytes: Some(1 << 20),
            max_open_files: Some(256),
            max_processes: None,
        }
    }
}

/// Paths hidden behind empty tmpfs mounts by default.
pub fn default_masked_paths() -> Vec<PathBuf> {
    ["/tmp", "/var/tmp", "/dev/shm", "/proc"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Limit {
    AddressSpace,
    Cpu,
    FileSize,
    OpenFiles,
    Processes,
    Core,
}

/// Everything the child needs, resolved before `fork`. [`Confinement::apply`]
/// only issues system calls: no allocation, no locks.
#[derive(Debug)]
pub(crate) struct Confinement {
    mode: IsolationMode,
    limits: Vec<(Limit, u64)>,
    #[cfg(target_os = "linux")]
    mounts: linux::MountPlan,
}

impl Confinement {
    /// Resolve the plan for one configuration.
    ///
    /// Fails only when namespaces are required and the mount table cannot be
    /// read.
    pub(crate) fn plan(
        mode: IsolationMode,
        limits: &ResourceLimits,
        cpu_seconds: u64,
        masked: &[PathBuf],
    ) -> io::Result<Self> {
        let mut planned = vec![(Limit::Cpu, cpu_seconds.max(1)), (Limit::Core, 0)];
        if let Some(mb) = limits.memory_mb {
            planned.push((Limit::AddressSpace, mb.saturating_mul(1 << 20)));
        }
        if let Some(bytes) = limits.max_file_bytes {
            planned.push((Limit::FileSize, bytes));
        }
        if let Some(n) = limits.max_open_files {
            planned.push((Limit::OpenFiles, n));
        }
        if let Some(n) = limits.max_processes {
            planned.push((Limit::Processes, n));
        }

        #[cfg(target_os = "linux")]
        let mounts = match mode {
            IsolationMode::Disabled => linux::MountPlan::default(),
            IsolationMode::Required => linux::MountPlan::resolve(masked)?,
            IsolationMode::BestEffort => linux::MountPlan::resolve(masked).unwrap_or_default(),
        };
        #[cfg(not(target_os = "linux"))]
        let _ = masked;

        Ok(Self {
            mode,
            limits: planned,
            #[cfg(target_os = "linux")]
            mounts,
        })
    }

    pub(crate) fn mode(&self) -> IsolationMode {
        self.mode
    }

    /// Runs in the child between `fork` and `exec`.
    #[cfg(unix)]
    pub(crate) fn apply(&self) -> io::Result<()> {
        if self.mode != IsolationMode::Disabled {
            match self.enter_namespaces() {
                Ok(()) => {}
                Err(e) if self.mode == IsolationMode::Required => return Err(e),
                Err(_) => {}
            }
        }
        self.apply_limits()
    }

    #[cfg(target_os = "linux")]
    fn enter_namespaces(&self) -> io::Result<()> {
        // SAFETY: single-threaded child; PR_SET_NO_NEW_PRIVS takes no pointers.
        check(unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) })?;
        self.mounts.enter()
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    fn enter_namespaces(&self) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    #[cfg(unix)]
    fn apply_limits(&self) -> io::Result<()> {
        macro_rules! lower {
            ($resource:expr, $value:expr) => {{
                let mut current = libc::rlimit {
                    rlim_cur: 0,
                    rlim_max: 0,
                };
                // SAFETY: `current` is a valid, writable rlimit.
                check(unsafe { libc::getrlimit($resource, &mut current) })?;
                let value = ($value as libc::rlim_t).min(current.rlim_max);
                let next = libc::rlimit {
                    rlim_cur: value,
                    rlim_max: value,
                };
                // SAFETY: `next` outlives the call.
                check(unsafe { libc::setrlimit($resource, &next) })
            }};
        }

        for &(limit, value) in &self.limits {
            match limit {
                Limit::AddressSpace => lower!(libc::RLIMIT_AS, value)?,
                Limit::Cpu => lower!(libc::RLIMIT_CPU, value)?,
                Limit::FileSize => lower!(libc::RLIMIT_FSIZE, value)?,
                Limit::OpenFiles => lower!(libc::RLIMIT_NOFILE, value)?,
                Limit::Processes => lower!(libc::RLIMIT_NPROC, value)?,
                Limit::Core => lower!(libc::RLIMIT_CORE, value)?,
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Kill every process in the group led by `pid`. Missing groups are ignored.
#[cfg(unix)]
pub(crate) fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    if pgid > 0 {
        // SAFETY: plain signal delivery; ESRCH just means the group is gone.
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::collections::HashSet;
    use std::ffi::CString;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::path::{Path, PathBuf};
    use std::ptr;

    use super::check;

    /// statvfs flag; not exported by every libc target.
    const ST_RELATIME: libc::c_ulong = 4096;

    const NAMESPACES: libc::c_int =
        libc::CLONE_NEWUSER | libc::CLONE_NEWNS | libc::CLONE_NEWNET | libc::CLONE_NEWIPC;

    #[derive(Debug, Default)]
    pub(super) struct MountPlan {
        /// Mount points with the flags the kernel requires a remount to keep.
        remounts: Vec<(CString, libc::c_ulong)>,
        masks: Vec<CString>,
    }

    impl MountPlan {
        pub(super) fn resolve(masked: &[PathBuf]) -> io::Result<Self> {
            let table = std::fs::read_to_string("/proc/self/mountinfo")?;
            let masked: Vec<&Path> = masked.iter().map(PathBuf::as_path).collect();

            let mut seen = HashSet::new();
            let mut remounts = Vec::new();
            for point in mount_points(&table) {
                if masked.iter().any(|m| point.starts_with(m)) || !seen.insert(point.clone()) {
                    continue;
                }
                let Ok(target) = CString::new(point.as_os_str().as_bytes()) else {
                    continue;
                };
                // Unreachable mount points are just as unreachable for the child.
                if let Some(flags) = locked_flags(&target) {
                    remounts.push((target, flags));
                }
            }

            let masks = masked
                .iter()
                .filter(|p| p.is_dir())
                .filter_map(|p| CString::new(p.as_os_str().as_bytes()).ok())
                .collect();

            Ok(Self { remounts, masks })
        }

        pub(super) fn enter(&self) -> io::Result<()> {
            let root = b"/\0".as_ptr().cast::<libc::c_char>();
            let tmpfs = b"tmpfs\0".as_ptr().cast::<libc::c_char>();
            let tmpfs_options = b"size=4k,mode=0555\0".as_ptr().cast::<libc::c_void>();

            // SAFETY: every pointer below is a NUL-terminated string owned by
            // `self` or a static literal, alive for the duration of the call.
            unsafe {
                check(libc::unshare(NAMESPACES))?;
                check(libc::mount(
                    ptr::null(),
                    root,
                    ptr::null(),
                    libc::MS_REC | libc::MS_PRIVATE,
                    ptr::null(),
                ))?;
                for (target, locked) in &self.remounts {
                    check(libc::mount(
                        ptr::null(),
                        target.as_ptr(),
                        ptr::null(),
                        libc::MS_BIND | libc::MS_REMOUNT | libc::MS_RDONLY | locked,
                        ptr::null(),
                    ))?;
                }
                for target in &self.masks {
                    check(libc::mount(
                        tmpfs,
                        target.as_ptr(),
                        tmpfs,
                        libc::MS_RDONLY | libc::MS_NOSUID | libc::MS_NODEV | libc::MS_NOEXEC,
                        tmpfs_options,
                    ))?;
                }
            }
            Ok(())
        }
    }

    /// Mount points from `/proc/self/mountinfo`, in table order.
    pub(super) fn mount_points(table: &str) -> Vec<PathBuf> {
        table
            .lines()
            .filter_map(|line| line.split(' ').nth(4))
            .map(|field| PathBuf::from(unescape(field)))
            .collect()
    }

    /// Undo the kernel's octal escapes (`\040` for space and friends).
    fn unescape(field: &str) -> String {
        let bytes = field.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'\\' && i + 3 < bytes.len() {
                let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).ok();
                if let Some(byte) = digits.and_then(|d| u8::from_str_radix(d, 8).ok()) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
            out.push(bytes[i]);
            i += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Flags a read-only bind remount has to repeat, or `None` if the mount
    /// point cannot be inspected.
    fn locked_flags(target: &CString) -> Option<libc::c_ulong> {
        // SAFETY: zeroed statvfs is a valid out-parameter.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: `target` is NUL-terminated and `stat` is writable.
        if unsafe { libc::statvfs(target.as_ptr(), &mut stat) } != 0 {
            return None;
        }
        let mapping = [
            (libc::ST_NOSUID, libc::MS_NOSUID),
            (libc::ST_NODEV, libc::MS_NODEV),
            (libc::ST_NOEXEC, libc::MS_NOEXEC),
            (libc::ST_NOATIME, libc::MS_NOATIME),
            (libc::ST_NODIRATIME, libc::MS_NODIRATIME),
            (ST_RELATIME, libc::MS_RELATIME),
        ];
        Some(
            mapping
                .iter()
                .filter(|(st, _)| stat.f_flag & st != 0)
                .fold(0, |acc, (_, ms)| acc | ms),
        )
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_mount_points_unescape_spaces() {
            let table = "22 1 0:21 / / rw,relatime - ext4 /dev/sda1 rw\n\
                         40 22 0:35 / /mnt/my\\040disk rw - tmpfs tmpfs rw\n";
            assert_eq!(
                mount_points(table),
                vec![PathBuf::from("/"), PathBuf::from("/mnt/my disk")]
            );
        }

        #[test]
        fn test_plan_skips_paths_under_masks() {
            let plan = MountPlan::resolve(&[PathBuf::from("/proc")]).unwrap();
            assert!(plan
                .remounts
                .iter()
                .all(|(p, _)| !p.as_bytes().starts_with(b"/proc")));
            assert!(plan.remounts.iter().any(|(p, _)| p.as_bytes() == b"/"));
        }
    }
}
