//! Mirror jobs and the tool command line they produce

use std::path::PathBuf;

use mirror_meta::{Config, DefaultsConfig, MirrorConfig};

/// Option appended to the defaults for a dry run
pub const DRY_RUN_OPTION: &str = "--dry-run";

/// One configured source to target replication task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorJob {
    /// Unique mirror name; also names the lock file
    pub name: String,
    pub source: String,
    pub target: String,
    /// Include patterns, in first-match-wins order
    pub include: Vec<String>,
    /// Exclude patterns, in first-match-wins order
    pub exclude: Vec<String>,
    /// Default tool options, emitted ahead of everything else
    pub options: Vec<String>,
    /// The external tool
    pub program: PathBuf,
}

impl MirrorJob {
    /// Build the job for mirror `name` from its section and the defaults.
    pub fn from_config(name: &str, mirror: &MirrorConfig, defaults: &DefaultsConfig) -> Self {
        Self {
            name: name.to_string(),
            source: mirror.source.clone(),
            target: mirror.target.clone(),
            include: mirror.include.clone(),
            exclude: mirror.exclude.clone(),
            options: defaults.rsync_options.clone(),
            program: defaults.rsync.clone(),
        }
    }

    /// Tool arguments, excluding the program itself.
    ///
    /// `[options...] [--include p]* [--exclude p]* <source>/ <target>/`
    pub fn arguments(&self) -> Vec<String> {
        let mut args = self.options.clone();
        for pattern in &self.include {
            args.push("--include".to_string());
            args.push(pattern.clone());
        }
        for pattern in &self.exclude {
            args.push("--exclude".to_string());
            args.push(pattern.clone());
        }
        args.push(normalize_dir_uri(&self.source));
        args.push(normalize_dir_uri(&self.target));
        args
    }
}

/// Force a trailing `/` so the tool copies directory contents, not the
/// directory itself.
pub fn normalize_dir_uri(uri: &str) -> String {
    if uri.ends_with('/') {
        uri.to_string()
    } else {
        format!("{}/", uri)
    }
}

/// The enabled mirrors of `config` as jobs, in configured order.
///
/// With `dry_run`, every job's options gain [`DRY_RUN_OPTION`].
pub fn jobs_from_config(config: &Config, dry_run: bool) -> mirror_meta::Result<Vec<MirrorJob>> {
    let jobs = config
        .enabled_mirrors()?
        .into_iter()
        .map(|(name, mirror)| {
            let mut job = MirrorJob::from_config(name, mirror, &config.defaults);
            if dry_run {
                job.options.push(DRY_RUN_OPTION.to_string());
            }
            job
        })
        .collect();
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    fn job() -> MirrorJob {
        MirrorJob {
            name: "fedora".to_string(),
            source: "host:/src".to_string(),
            target: "/dst".to_string(),
            include: vec!["i1".to_string(), "i2".to_string()],
            exclude: vec!["e1".to_string(), "e2".to_string()],
            options: vec!["-a".to_string()],
            program: PathBuf::from("/usr/bin/rsync"),
        }
    }

    #[test]
    fn test_arguments_keep_configured_order() {
        assert_eq!(
            job().arguments(),
            vec![
                "-a", "--include", "i1", "--include", "i2", "--exclude", "e1", "--exclude",
                "e2", "host:/src/", "/dst/"
            ]
        );
    }

    #[test]
    fn test_arguments_without_patterns() {
        let job = MirrorJob {
            include: Vec::new(),
            exclude: Vec::new(),
            options: Vec::new(),
            ..job()
        };
        assert_eq!(job.arguments(), vec!["host:/src/", "/dst/"]);
    }

    #[rstest]
    #[case("a/b", "a/b/")]
    #[case("a/b/", "a/b/")]
    #[case("rsync://host/path", "rsync://host/path/")]
    #[case("", "/")]
    fn test_normalize_dir_uri(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_dir_uri(input), expected);
    }

    #[test]
    fn test_jobs_from_config_in_enabled_order() {
        let config: Config = toml::from_str(
            r#"
            [defaults]
            rsync = "/opt/rsync"
            rsync_options = ["-a", "--delete"]

            [mirrors]
            enabled = ["zeta", "alpha"]

            [mirror.alpha]
            source = "rsync://h/alpha"
            target = "/srv/alpha"

            [mirror.zeta]
            source = "rsync://h/zeta"
            target = "/srv/zeta"
            exclude = ["*.iso"]
            "#,
        )
        .unwrap();

        let jobs = jobs_from_config(&config, false).unwrap();

        let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(jobs[0].program, PathBuf::from("/opt/rsync"));
        assert_eq!(jobs[0].exclude, vec!["*.iso".to_string()]);
        assert_eq!(jobs[1].options, vec!["-a".to_string(), "--delete".to_string()]);
    }

    #[test]
    fn test_dry_run_appends_option() {
        let config: Config = toml::from_str(
            r#"
            [defaults]
            rsync_options = ["-a"]
            [mirrors]
            enabled = ["m"]
            [mirror.m]
            source = "s"
            target = "t"
            "#,
        )
        .unwrap();

        let jobs = jobs_from_config(&config, true).unwrap();

        assert_eq!(jobs[0].arguments(), vec!["-a", "--dry-run", "s/", "t/"]);
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(uri in "[a-z:/._-]{0,40}") {
            let once = normalize_dir_uri(&uri);
            prop_assert!(once.ends_with('/'));
            prop_assert_eq!(normalize_dir_uri(&once), once.clone());
        }
    }
}
