use domain_snapshot::model::entity::MarkerOwner;
use rustix::io::Errno;
use rustix::process::{test_kill_process, Pid};

pub fn current_pid() -> u32 {
    std::process::id()
}

/// Whether a process with `pid` exists. Existing but foreign processes count as alive.
pub fn process_alive(pid: u32) -> bool {
    let Some(pid) = i32::try_from(pid).ok().and_then(Pid::from_raw) else {
        return false;
    };
    match test_kill_process(pid) {
        Ok(()) => true,
        Err(e) => e == Errno::PERM,
    }
}

/// Field 22 of `/proc/<pid>/stat`. `None` off Linux or when the process is gone.
pub fn process_start_time(pid: u32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_start_time(&stat)
}

fn parse_start_time(stat: &str) -> Option<u64> {
    // The command name may hold spaces and parentheses; fields resume after the last `)`.
    let (_, rest) = stat.rsplit_once(')')?;
    rest.split_whitespace().nth(19)?.parse().ok()
}

/// Whether the process named by a marker from another engine instance still runs.
///
/// Our own pid under a different instance id belongs to a previous incarnation.
pub fn foreign_owner_alive(owner: &MarkerOwner) -> bool {
    if owner.pid == current_pid() || !process_alive(owner.pid) {
        return false;
    }
    match (owner.start_time, process_start_time(owner.pid)) {
        (Some(recorded), Some(actual)) => recorded == actual,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn owner(pid: u32, start_time: Option<u64>) -> MarkerOwner {
        MarkerOwner {
            pid,
            instance: Uuid::new_v4(),
            task: 0,
            start_time,
        }
    }

    #[test]
    fn test_process_alive() {
        assert!(process_alive(current_pid()));
        assert!(!process_alive(0));
        assert!(!process_alive(i32::MAX as u32));
    }

    #[test]
    fn test_parse_start_time() {
        let stat = "4242 (my (odd) cmd) S 1 4242 4242 0 -1 4194560 100 0 0 0 2 1 0 0 20 0 1 0 987654 1000 10";
        assert_eq!(parse_start_time(stat), Some(987654));
        assert_eq!(parse_start_time("4242 (cmd) S 1"), None);
        assert_eq!(parse_start_time(""), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_own_start_time_is_stable() {
        let first = process_start_time(current_pid());
        assert!(first.is_some());
        assert_eq!(first, process_start_time(current_pid()));
    }

    #[test]
    fn test_our_pid_under_another_instance_is_dead() {
        assert!(!foreign_owner_alive(&owner(current_pid(), None)));
        assert!(!foreign_owner_alive(&owner(
            current_pid(),
            process_start_time(current_pid())
        )));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_recycled_pid_is_dead() {
        let parent = std::os::unix::process::parent_id();
        let started = process_start_time(parent);
        assert!(foreign_owner_alive(&owner(parent, started)));
        let recycled = started.map(|t| t + 1);
        assert!(!foreign_owner_alive(&owner(parent, recycled)));
        assert!(!foreign_owner_alive(&owner(i32::MAX as u32, None)));
    }
}
