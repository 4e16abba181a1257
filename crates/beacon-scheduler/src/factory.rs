//! Builder expansion across workers and environments.

use beacon_core::builder::{Builder, BuilderTemplate};
use beacon_core::environment::EnvironmentDescriptor;
use beacon_core::worker::Worker;
use beacon_core::{ConfigError, ConfigErrors};
use std::collections::HashSet;
use tracing::debug;

/// Expands builder templates into concrete builders.
pub struct BuilderFactory;

impl BuilderFactory {
    /// Expand one template over the worker × environment product.
    ///
    /// Output order is worker-major, environment-minor, following the order
    /// of the given slices.
    pub fn expand(
        template: &BuilderTemplate,
        workers: &[Worker],
        environments: &[EnvironmentDescriptor],
    ) -> Result<Vec<Builder>, ConfigError> {
        let mut seen = HashSet::new();
        let mut builders = Vec::new();

        for worker in workers.iter().filter(|w| Self::hosts(template, w)) {
            for env in environments {
                if !env.serves_any(&template.tags) || !worker.supports_arch(env.arch.as_deref()) {
                    continue;
                }

                let builder = template.instantiate(worker, env);
                if !seen.insert(builder.name.clone()) {
                    return Err(ConfigError::DuplicateBuilder(builder.name));
                }
                builders.push(builder);
            }
        }

        debug!(
            template = %template.name,
            builders = builders.len(),
            "Expanded builder template"
        );

        Ok(builders)
    }

    /// Expand every template, checking name uniqueness across the whole set.
    pub fn expand_all(
        templates: &[BuilderTemplate],
        workers: &[Worker],
        environments: &[EnvironmentDescriptor],
    ) -> Result<Vec<Builder>, ConfigErrors> {
        let mut errors = ConfigErrors::new();
        let mut names = HashSet::new();
        let mut builders = Vec::new();

        for template in templates {
            match Self::expand(template, workers, environments) {
                Ok(expanded) if expanded.is_empty() => {
                    errors.push(ConfigError::NoBuilders {
                        template: template.name.clone(),
                    });
                }
                Ok(expanded) => {
                    for builder in expanded {
                        if names.insert(builder.name.clone()) {
                            builders.push(builder);
                        } else {
                            errors.push(ConfigError::DuplicateBuilder(builder.name));
                        }
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        errors.into_result(builders)
    }

    fn hosts(template: &BuilderTemplate, worker: &Worker) -> bool {
        template
            .requires
            .as_deref()
            .is_none_or(|capability| worker.has_capability(capability))
    }
}
