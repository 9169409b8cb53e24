//! Static analysis of changed Terraform modules.

use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use warden_core::{ChangeBlock, WardenError};

use crate::github::PullRequestInfo;

/// Produces a textual report that review stages take as extra context.
#[async_trait]
pub trait StaticAnalyzer: Send + Sync {
    /// Analyze the pull request; `Ok(None)` when there is nothing to report.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Analyzer`] if the checkout cannot be prepared.
    async fn analyze(
        &self,
        pr: &PullRequestInfo,
        changes: &[ChangeBlock],
    ) -> Result<Option<String>, WardenError>;
}

/// Analyzer used when static analysis is disabled.
pub struct NoopAnalyzer;

#[async_trait]
impl StaticAnalyzer for NoopAnalyzer {
    async fn analyze(
        &self,
        _pr: &PullRequestInfo,
        _changes: &[ChangeBlock],
    ) -> Result<Option<String>, WardenError> {
        Ok(None)
    }
}

/// Runs `terraform validate` and `tflint` on every module touched by the
/// pull request.
///
/// The head commit is fetched shallowly into a temporary directory that is
/// removed afterwards. Tools missing from `PATH` are noted in the report.
pub struct TerraformAnalyzer {
    token: Option<String>,
}

/// Git credential helper that answers from the environment, so the token
/// never appears in a command line or on disk.
const CREDENTIAL_HELPER: &str =
    "!f() { echo username=x-access-token; echo \"password=$WARDEN_GIT_TOKEN\"; }; f";

impl TerraformAnalyzer {
    /// Create an analyzer; `token` authenticates the fetch of private repositories.
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    fn remote_url(pr: &PullRequestInfo) -> String {
        format!("https://github.com/{}/{}.git", pr.owner, pr.repo)
    }

    /// Environment for git commands: the token plus a one-off credential
    /// helper reading it.
    fn git_env(&self) -> Vec<(&'static str, String)> {
        let Some(token) = &self.token else {
            return Vec::new();
        };
        vec![
            ("WARDEN_GIT_TOKEN", token.clone()),
            ("GIT_TERMINAL_PROMPT", "0".into()),
            ("GIT_CONFIG_COUNT", "1".into()),
            ("GIT_CONFIG_KEY_0", "credential.helper".into()),
            ("GIT_CONFIG_VALUE_0", CREDENTIAL_HELPER.into()),
        ]
    }

    async fn checkout(&self, pr: &PullRequestInfo, dir: &Path) -> Result<(), WardenError> {
        let pull_ref = format!("pull/{}/head", pr.number);
        let remote = Self::remote_url(pr);
        let steps: [&[&str]; 3] = [
            &["init", "--quiet"],
            &["fetch", "--quiet", "--depth", "1", remote.as_str(), pull_ref.as_str()],
            &["checkout", "--quiet", "FETCH_HEAD"],
        ];
        let env = self.git_env();
        for args in steps {
            let output = Command::new("git")
                .args(args)
                .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
                .current_dir(dir)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| WardenError::Analyzer(format!("failed to run git: {e}")))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(WardenError::Analyzer(format!(
                    "git {} failed: {}",
                    args[0],
                    stderr.trim()
                )));
            }
        }
        Ok(())
    }
}

/// Directories holding changed `.tf` files, in sorted order.
///
/// # Examples
///
/// ```
/// use warden_core::{ChangeBlock, ChangeStatus};
/// use warden_review::analyzer::terraform_modules;
///
/// let block = |f: &str| ChangeBlock {
///     filename: f.into(),
///     start_line: 1,
///     changed_code: "+x".into(),
///     status: ChangeStatus::Added,
/// };
/// let changes = [block("modules/vpc/main.tf"), block("main.tf"), block("README.md")];
/// let dirs = terraform_modules(&changes);
/// assert_eq!(dirs, vec![".".to_string(), "modules/vpc".to_string()]);
/// ```
pub fn terraform_modules(changes: &[ChangeBlock]) -> Vec<String> {
    changes
        .iter()
        .filter(|c| c.filename.ends_with(".tf"))
        .map(|c| match c.filename.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => ".".to_string(),
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Run one tool and append its outcome to `report`.
async fn run_tool(report: &mut String, dir: &Path, program: &str, args: &[&str]) {
    let title = format!("{program} {}", args.join(" "));
    let result = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .env("TF_IN_AUTOMATION", "1")
        .output()
        .await;

    match result {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            let verdict = if output.status.success() { "ok" } else { "failed" };
            debug!(program, ?dir, verdict, "tool finished");
            let _ = writeln!(report, "#### `{title}`: {verdict}\n```\n{}\n```", text.trim());
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(program, "not found on PATH");
            let _ = writeln!(report, "#### `{title}`: skipped, `{program}` is not installed");
        }
        Err(e) => {
            let _ = writeln!(report, "#### `{title}`: could not run: {e}");
        }
    }
}

#[async_trait]
impl StaticAnalyzer for TerraformAnalyzer {
    async fn analyze(
        &self,
        pr: &PullRequestInfo,
        changes: &[ChangeBlock],
    ) -> Result<Option<String>, WardenError> {
        let modules = terraform_modules(changes);
        if modules.is_empty() {
            debug!("no terraform changes");
            return Ok(None);
        }

        let checkout = tempfile::tempdir()?;
        self.checkout(pr, checkout.path()).await?;
        info!(modules = modules.len(), "running terraform static analysis");

        let mut report = String::new();
        for module in &modules {
            let dir = checkout.path().join(module);
            if !dir.is_dir() {
                debug!(module, "module removed by the pull request");
                continue;
            }
            let _ = writeln!(report, "### {module}");
            let init = ["init", "-backend=false", "-input=false", "-no-color"];
            run_tool(&mut report, &dir, "terraform", &init).await;
            run_tool(&mut report, &dir, "terraform", &["validate", "-no-color"]).await;
            run_tool(&mut report, &dir, "tflint", &["--no-color"]).await;
        }

        Ok((!report.is_empty()).then_some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_stays_out_of_git_arguments() {
        let pr = PullRequestInfo {
            owner: "acme".into(),
            repo: "infra".into(),
            number: 7,
            ..PullRequestInfo::default()
        };
        assert_eq!(
            TerraformAnalyzer::remote_url(&pr),
            "https://github.com/acme/infra.git"
        );

        let env = TerraformAnalyzer::new(Some("t0k".into())).git_env();
        let carrying: Vec<_> = env.iter().filter(|(_, v)| v.contains("t0k")).collect();
        assert_eq!(carrying, vec![&("WARDEN_GIT_TOKEN", "t0k".to_string())]);
        assert!(env.contains(&("GIT_CONFIG_VALUE_0", CREDENTIAL_HELPER.to_string())));

        assert!(TerraformAnalyzer::new(None).git_env().is_empty());
    }

    #[tokio::test]
    async fn no_terraform_changes_skips_checkout() {
        let analyzer = TerraformAnalyzer::new(None);
        let changes = vec![ChangeBlock {
            filename: "docs/index.md".into(),
            start_line: 1,
            changed_code: "+hello".into(),
            status: warden_core::ChangeStatus::Added,
        }];
        let report = analyzer
            .analyze(&PullRequestInfo::default(), &changes)
            .await
            .unwrap();
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn missing_tool_is_reported_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = String::new();
        run_tool(&mut report, dir.path(), "warden-no-such-tool", &["--version"]).await;
        assert!(report.contains("is not installed"));
    }
}
