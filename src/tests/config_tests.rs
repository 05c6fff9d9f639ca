#[cfg(test)]
mod tests {
    use crate::config::{self, resolve_folder, AppConfig};
    use std::env;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.root, "~/folderbound");
        assert_eq!(config.workers.min_workers, 2);
        assert_eq!(config.workers.max_workers, 16);
        assert_eq!(config.workers.cpu_multiplier, 2);
        assert_eq!(config.watcher.max_depth, 2);
        assert_eq!(config.watcher.debounce_ms, 1000);
        assert_eq!(config.watcher.exclude_markers, vec![".SynologyWorkingDirectory"]);
        assert_eq!(config.sidecar.save_queue_capacity, 256);
        assert_eq!(config.companies.sidecar_filename, "@company.yaml");
        assert_eq!(config.projects.sidecar_filename, "@koji.yaml");
        assert_eq!(config.projects.managed_file_extensions, vec!["xlsx", "xls"]);
        assert!(config::validate(&config).is_ok());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = config::from_toml_str(
            r#"
root = "/srv/data"

[watcher]
max_depth = 3
debounce_ms = 250

[projects]
enabled = false
"#,
        )
        .unwrap();

        assert_eq!(config.root, "/srv/data");
        assert_eq!(config.watcher.max_depth, 3);
        assert_eq!(config.watcher.event_buffer, 256);
        assert!(!config.projects.enabled);
        assert!(config.companies.enabled);
        assert_eq!(config.companies_folder(), PathBuf::from("/srv/data/1 Companies"));
        assert_eq!(config.projects_folder(), PathBuf::from("/srv/data/2 Projects"));

        let watcher = config.watcher_settings();
        assert_eq!(watcher.debounce, Duration::from_millis(250));
        assert_eq!(watcher.max_depth, 3);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases = [
            ("[workers]\nmin_workers = 0", "workers.min_workers"),
            ("[workers]\nmin_workers = 8\nmax_workers = 4", "must be <="),
            ("[workers]\ncpu_multiplier = 0", "workers.cpu_multiplier"),
            ("[watcher]\ndebounce_ms = 1", "watcher.debounce_ms"),
            ("[watcher]\nevent_buffer = 0", "watcher.event_buffer"),
            ("[sidecar]\nsave_queue_capacity = 0", "sidecar.save_queue_capacity"),
            ("[companies]\nsidecar_filename = \" \"", "companies.sidecar_filename"),
        ];
        for (toml, expected) in cases {
            let config = config::from_toml_str(toml).unwrap();
            let err = config::validate(&config).unwrap_err().to_string();
            assert!(err.contains(expected), "{:?} gave {:?}", toml, err);
        }
    }

    #[test]
    fn test_resolve_folder() {
        assert_eq!(resolve_folder("{ROOT}/1 Companies", "/data"), PathBuf::from("/data/1 Companies"));
        assert_eq!(resolve_folder("/abs/2 Projects", "/ignored"), PathBuf::from("/abs/2 Projects"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(resolve_folder("{ROOT}/x", "~/folderbound"), home.join("folderbound/x"));
        }
    }

    #[test]
    fn test_config_from_env() {
        env::set_var("FOLDERBOUND__WATCHER__MAX_DEPTH", "5");
        env::set_var("FOLDERBOUND__PROJECTS__SIDECAR_FILENAME", "@project.yaml");

        let config = config::load().unwrap();

        assert_eq!(config.watcher.max_depth, 5);
        assert_eq!(config.projects.sidecar_filename, "@project.yaml");

        env::remove_var("FOLDERBOUND__WATCHER__MAX_DEPTH");
        env::remove_var("FOLDERBOUND__PROJECTS__SIDECAR_FILENAME");
    }
}
