//! Bringing a runtime up.
//!
//! Loading creates the engine; installing runs each configured component
//! once against a scratch frame so the first real script does not pay for
//! it. A failed install is reported to the bridge, which logs it and moves
//! on.

use super::engine::PolarsRuntime;
use super::script::{Script, ScriptOutput};
use crate::table::{Table, Value};
use anyhow::{Context as _, Result, bail};
use std::future::Future;

/// Components installed when configuration does not name any.
pub const DEFAULT_COMPONENTS: &[&str] = &["describe", "csv"];

pub trait RuntimeLoader: Send + Sync + 'static {
    fn load(&self) -> impl Future<Output = Result<PolarsRuntime>> + Send;

    fn install(
        &self,
        runtime: &mut PolarsRuntime,
        component: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn components(&self) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct PolarsLoader {
    components: Vec<String>,
}

impl Default for PolarsLoader {
    fn default() -> Self {
        Self::new(DEFAULT_COMPONENTS.iter().map(|c| (*c).to_owned()).collect())
    }
}

impl PolarsLoader {
    pub fn new(components: Vec<String>) -> Self {
        Self { components }
    }
}

fn probe_table() -> Result<Table> {
    Ok(Table::from_rows(
        vec!["probe".to_owned()],
        vec![vec![Value::from(1.0)], vec![Value::Null], vec![Value::from("x")]],
    )?)
}

impl RuntimeLoader for PolarsLoader {
    async fn load(&self) -> Result<PolarsRuntime> {
        tokio::task::spawn_blocking(|| -> Result<PolarsRuntime> {
            let mut runtime = PolarsRuntime::new();
            runtime.run(Script::Load {
                table: probe_table()?,
            })?;
            Ok(runtime)
        })
        .await
        .context("runtime load task panicked")?
    }

    async fn install(&self, runtime: &mut PolarsRuntime, component: &str) -> Result<()> {
        let script = match component {
            "describe" => Script::Describe,
            "csv" => Script::ToCsv,
            "coerce" => Script::PreviewCoerce {
                column: "probe".to_owned(),
                samples: 1,
            },
            other => bail!("unknown runtime component '{other}'"),
        };
        let output = runtime
            .run(script)
            .with_context(|| format!("installing component '{component}'"))?;
        if matches!(output, ScriptOutput::Unit) {
            bail!("component '{component}' produced no output");
        }
        runtime.mark_installed(component);
        Ok(())
    }

    fn components(&self) -> Vec<String> {
        self.components.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_loader_installs_components() -> Result<()> {
        let loader = PolarsLoader::default();
        let mut runtime = loader.load().await?;
        for component in loader.components() {
            loader.install(&mut runtime, &component).await?;
        }
        assert_eq!(runtime.installed(), ["describe", "csv"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_component_fails() -> Result<()> {
        let loader = PolarsLoader::default();
        let mut runtime = loader.load().await?;
        assert!(loader.install(&mut runtime, "tensorflow").await.is_err());
        assert!(runtime.installed().is_empty());
        Ok(())
    }
}
