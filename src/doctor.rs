use std::path::Path;

use buildgraph_core::config::AppConfig;
use buildgraph_tasks::TaskRegistry;

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

pub fn run_doctor(config: &AppConfig, registry: &TaskRegistry) {
    let checks = collect_checks(config, registry);

    // Print results
    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
}

fn collect_checks(config: &AppConfig, registry: &TaskRegistry) -> Vec<CheckResult> {
    vec![
        // 1. Workspace root exists
        check_workspace(config),
        // 2. Local temp storage writable
        check_local_storage(config),
        // 3. Shared temp storage reachable
        check_shared_storage(config),
        // 4. Retry settings sane
        check_retry(config),
        // 5. Tasks available to scripts
        check_tasks(registry),
    ]
}

fn check_workspace(config: &AppConfig) -> CheckResult {
    let root = config.workspace_root();
    if root.is_dir() {
        CheckResult {
            label: "Workspace".into(),
            ok: true,
            detail: format!("{}", root.display()),
        }
    } else {
        CheckResult {
            label: "Workspace".into(),
            ok: false,
            detail: format!("{} (does not exist)", root.display()),
        }
    }
}

/// Create `dir` if needed and write a probe file into it.
fn probe_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(".doctor_test");
    std::fs::write(&probe, "test")?;
    std::fs::remove_file(&probe)
}

fn check_local_storage(config: &AppConfig) -> CheckResult {
    let dir = config.local_storage_dir();
    match probe_writable(&dir) {
        Ok(()) => CheckResult {
            label: "Local storage".into(),
            ok: true,
            detail: format!("{}", dir.display()),
        },
        Err(e) => CheckResult {
            label: "Local storage".into(),
            ok: false,
            detail: format!("{} (not writable: {})", dir.display(), e),
        },
    }
}

fn check_shared_storage(config: &AppConfig) -> CheckResult {
    let Some(dir) = config.shared_storage_dir() else {
        return CheckResult {
            label: "Shared storage".into(),
            ok: true,
            detail: "Not configured (single-machine builds only)".into(),
        };
    };

    if !dir.is_dir() {
        return CheckResult {
            label: "Shared storage".into(),
            ok: false,
            detail: format!("{} (not reachable)", dir.display()),
        };
    }

    if !config.storage.writable_shared {
        return CheckResult {
            label: "Shared storage".into(),
            ok: true,
            detail: format!("{} (read-only)", dir.display()),
        };
    }

    match probe_writable(&dir) {
        Ok(()) => CheckResult {
            label: "Shared storage".into(),
            ok: true,
            detail: format!("{}", dir.display()),
        },
        Err(e) => CheckResult {
            label: "Shared storage".into(),
            ok: false,
            detail: format!("{} (writable_shared is set but: {})", dir.display(), e),
        },
    }
}

fn check_retry(config: &AppConfig) -> CheckResult {
    let storage = &config.storage;
    if storage.retry_attempts == 0 || storage.unzip_attempts == 0 {
        return CheckResult {
            label: "Retry".into(),
            ok: false,
            detail: format!(
                "retry_attempts ({}) and unzip_attempts ({}) must be at least 1",
                storage.retry_attempts, storage.unzip_attempts
            ),
        };
    }

    CheckResult {
        label: "Retry".into(),
        ok: true,
        detail: format!(
            "{} attempts, {}s apart ({} per archive when extracting)",
            storage.retry_attempts, storage.retry_delay_secs, storage.unzip_attempts
        ),
    }
}

fn check_tasks(registry: &TaskRegistry) -> CheckResult {
    let names = registry.list();
    CheckResult {
        label: "Tasks".into(),
        ok: !names.is_empty(),
        detail: if names.is_empty() {
            "No tasks registered".into()
        } else {
            names.join(", ")
        },
    }
}
