//! Child process environment.

use super::OsEnvironmentMode;
use crate::error::Result;
use crate::manifest::ParameterValue;
use crate::parameters::{LockedParameter, SecretResolver};
use crate::state::StateLocation;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// OS variables kept in strict mode.
const STRICT_PASSTHROUGH: &[&str] = &["PATH", "HOME", "USER", "TMPDIR", "LANG", "TERM"];

/// Where a component runs and what it is told about the invocation.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    pub component: String,
    pub component_dir: PathBuf,
    pub base_dir: PathBuf,
    pub verb: String,
    pub dry_run: bool,
    pub elaborate: Vec<PathBuf>,
    pub state: Vec<StateLocation>,
    pub otp_seed: String,
}

/// Builds the environment of component processes.
pub struct EnvironmentBuilder<'a> {
    mode: OsEnvironmentMode,
    os_env: &'a BTreeMap<String, String>,
    overrides: Option<&'a BTreeMap<String, String>>,
    secrets: &'a dyn SecretResolver,
}

impl<'a> EnvironmentBuilder<'a> {
    pub fn new(
        mode: OsEnvironmentMode,
        os_env: &'a BTreeMap<String, String>,
        secrets: &'a dyn SecretResolver,
    ) -> Self {
        Self { mode, os_env, overrides: None, secrets }
    }

    /// Variables set for every component, above the OS environment.
    pub fn with_overrides(mut self, overrides: &'a BTreeMap<String, String>) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// The caller's environment filtered by mode.
    pub fn base(&self) -> BTreeMap<String, String> {
        self.os_env
            .iter()
            .filter(|(name, _)| match self.mode {
                OsEnvironmentMode::Everything => true,
                OsEnvironmentMode::NoTfvars => !name.starts_with("TF_VAR_"),
                OsEnvironmentMode::Strict => STRICT_PASSTHROUGH.contains(&name.as_str()),
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Full environment for one invocation.
    ///
    /// Parameters are exported only under their declared `env` name. Secret
    /// plaintext is fetched here and lives only in the returned map.
    pub async fn build(
        &self,
        ctx: &InvocationContext,
        parameters: &[LockedParameter],
    ) -> Result<BTreeMap<String, String>> {
        let mut env = self.base();
        if let Some(overrides) = self.overrides {
            env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        for param in parameters {
            let Some(var) = &param.env else { continue };
            let value = match &param.value {
                ParameterValue::SecretRef { secret_ref, kind } => {
                    debug!("Resolving secret for {} via {}", var, self.secrets.name());
                    let kind = kind.as_deref().or(param.kind.secret_kind());
                    self.secrets.resolve(secret_ref, kind).await?
                }
                other => other.as_binding(),
            };
            env.insert(var.clone(), value);
        }

        let join_paths = |paths: Vec<String>| paths.join(",");
        env.insert(
            "HUB_ELABORATE".to_string(),
            join_paths(ctx.elaborate.iter().map(|p| p.display().to_string()).collect()),
        );
        env.insert(
            "HUB_STATE".to_string(),
            join_paths(ctx.state.iter().map(|l| l.to_string()).collect()),
        );
        env.insert("HUB_COMPONENTS_BASEDIR".to_string(), ctx.base_dir.display().to_string());
        env.insert("HUB_COMPONENT".to_string(), ctx.component.clone());
        env.insert("HUB_COMPONENT_DIR".to_string(), ctx.component_dir.display().to_string());
        env.insert("HUB_VERB".to_string(), ctx.verb.clone());
        env.insert("HUB_DRY_RUN".to_string(), ctx.dry_run.to_string());
        env.insert("HUB_OTP_SEED".to_string(), ctx.otp_seed.clone());
        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ParameterKind;
    use crate::parameters::StaticSecrets;

    fn os_env() -> BTreeMap<String, String> {
        [("PATH", "/bin"), ("TF_VAR_region", "x"), ("AWS_PROFILE", "dev"), ("HOME", "/root")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn param(
        name: &str,
        env: Option<&str>,
        kind: ParameterKind,
        value: ParameterValue,
    ) -> LockedParameter {
        LockedParameter {
            name: name.to_string(),
            component: None,
            kind,
            value,
            env: env.map(str::to_string),
            deferred: false,
        }
    }

    #[test]
    fn test_modes() {
        let os = os_env();
        let secrets = StaticSecrets::default();

        let everything =
            EnvironmentBuilder::new(OsEnvironmentMode::Everything, &os, &secrets).base();
        assert_eq!(everything.len(), 4);

        let no_tfvars = EnvironmentBuilder::new(OsEnvironmentMode::NoTfvars, &os, &secrets).base();
        assert!(!no_tfvars.contains_key("TF_VAR_region"));
        assert!(no_tfvars.contains_key("AWS_PROFILE"));

        let strict = EnvironmentBuilder::new(OsEnvironmentMode::Strict, &os, &secrets).base();
        assert_eq!(strict.keys().collect::<Vec<_>>(), vec!["HOME", "PATH"]);
    }

    #[tokio::test]
    async fn test_build_exports_parameters_and_context() {
        let os = os_env();
        let mut secrets = StaticSecrets::default();
        secrets.insert("vault/db", "hunter2");
        let overrides = BTreeMap::from([("EXTRA".to_string(), "1".to_string())]);
        let builder = EnvironmentBuilder::new(OsEnvironmentMode::Strict, &os, &secrets)
            .with_overrides(&overrides);

        let params = vec![
            param(
                "region",
                Some("REGION"),
                ParameterKind::Plain,
                ParameterValue::string("us-east-1"),
            ),
            param("hidden", None, ParameterKind::Plain, ParameterValue::string("nope")),
            param(
                "db.password",
                Some("DB_PASSWORD"),
                ParameterKind::Secret(None),
                ParameterValue::SecretRef { secret_ref: "vault/db".into(), kind: None },
            ),
        ];
        let ctx = InvocationContext {
            component: "db".into(),
            verb: "deploy".into(),
            elaborate: vec![PathBuf::from("hub.yaml.elaborate")],
            state: vec![
                StateLocation::File("a.state".into()),
                StateLocation::File("b.state".into()),
            ],
            otp_seed: "00".into(),
            ..Default::default()
        };

        let env = builder.build(&ctx, &params).await.unwrap();
        assert_eq!(env["REGION"], "us-east-1");
        assert_eq!(env["DB_PASSWORD"], "hunter2");
        assert!(!env.values().any(|v| v == "nope"));
        assert_eq!(env["HUB_STATE"], "a.state,b.state");
        assert_eq!(env["HUB_COMPONENT"], "db");
        assert_eq!(env["HUB_DRY_RUN"], "false");
        assert!(!env.contains_key("AWS_PROFILE"));
        assert_eq!(env["EXTRA"], "1");
    }

    #[tokio::test]
    async fn test_missing_secret_fails() {
        let os = BTreeMap::new();
        let secrets = StaticSecrets::default();
        let builder = EnvironmentBuilder::new(OsEnvironmentMode::Everything, &os, &secrets);
        let params = vec![param(
            "token",
            Some("TOKEN"),
            ParameterKind::Secret(None),
            ParameterValue::SecretRef { secret_ref: "missing".into(), kind: None },
        )];
        assert!(builder.build(&InvocationContext::default(), &params).await.is_err());
    }
}
