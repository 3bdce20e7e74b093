//! URL-to-object resolution
//!
//! Maps a local URL path back to the domain entity it renders, so an
//! incoming mention can be attached to that entity. Route patterns are
//! registered by the host application; each pattern optionally names a
//! model and a mapping from its captures to query fields. An optional
//! auxiliary resolver (a second routing framework) can be plugged in
//! behind the same interface.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use crate::error::AppError;

/// A local entity that mentions can point at.
pub trait Mentionable: Send + Sync {
    /// Canonical absolute URL of this entity.
    fn absolute_url(&self) -> String;

    /// Rendered HTML body, for outbound link scanning.
    fn content_html(&self) -> String;

    /// Opt-out hook; entities returning false never accept mentions.
    fn should_process_webmentions(&self) -> bool {
        true
    }

    /// Stable reference stored on the Mention row ("model_name/object_id").
    fn object_ref(&self) -> String;
}

impl std::fmt::Debug for dyn Mentionable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mentionable")
            .field("object_ref", &self.object_ref())
            .finish()
    }
}

/// A registered model type that can look entities up by the fields
/// captured from a URL.
pub trait MentionableModel: Send + Sync {
    /// Qualified type identifier matching RouteEntry::model_name.
    fn name(&self) -> &str;

    /// Query by the captured (field, value) pairs.
    ///
    /// # Errors
    /// `ImplementationRequired` when the model cannot resolve from
    /// URL captures at all.
    fn resolve_from_url_kwargs(
        &self,
        kwargs: &[(String, String)],
    ) -> Result<Option<Arc<dyn Mentionable>>, AppError>;
}

/// Optional secondary resolver consulted when no registered route
/// matches a path.
pub trait AuxResolver: Send + Sync {
    fn resolve(&self, path: &str) -> Result<Option<Arc<dyn Mentionable>>, AppError>;
}

/// How a route's captures map onto model query fields.
#[derive(Debug, Clone)]
pub enum ParamMapping {
    /// captured name → query field
    Named(Vec<(String, String)>),
    /// query fields in positional-group order
    Positional(Vec<String>),
    /// capture name equals query field; an unnamed single group falls
    /// back to the configured default field
    Identity,
}

/// One registered URL pattern.
pub struct RouteEntry {
    pattern: Regex,
    model_name: Option<String>,
    mapping: ParamMapping,
}

/// Resolver over the registered routes and model types.
pub struct UrlResolver {
    routes: Vec<RouteEntry>,
    models: HashMap<String, Arc<dyn MentionableModel>>,
    aux: Option<Arc<dyn AuxResolver>>,
    /// Query field used for an unnamed capture under Identity mapping
    default_field: String,
}

impl UrlResolver {
    pub fn new(default_field: impl Into<String>) -> Self {
        Self {
            routes: Vec::new(),
            models: HashMap::new(),
            aux: None,
            default_field: default_field.into(),
        }
    }

    /// Register a URL pattern. The regex is anchored to the full path.
    ///
    /// # Errors
    /// `BadUrlConfig` when the pattern is not a valid regex.
    pub fn add_route(
        &mut self,
        pattern: &str,
        model_name: Option<String>,
        mapping: ParamMapping,
    ) -> Result<(), AppError> {
        let anchored = format!("^{}$", pattern);
        let pattern = Regex::new(&anchored)
            .map_err(|e| AppError::BadUrlConfig(format!("invalid route pattern: {}", e)))?;
        self.routes.push(RouteEntry {
            pattern,
            model_name,
            mapping,
        });
        Ok(())
    }

    pub fn register_model(&mut self, model: Arc<dyn MentionableModel>) {
        self.models.insert(model.name().to_string(), model);
    }

    pub fn set_aux(&mut self, aux: Arc<dyn AuxResolver>) {
        self.aux = Some(aux);
    }

    /// Resolve a local URL path to the entity it renders.
    ///
    /// The first matching route decides the outcome:
    /// - no route matches anywhere → `TargetDoesNotExist`
    /// - matching route has no model → `NoModelForUrlPath`
    /// - model name not registered → `BadUrlConfig`
    /// - model query finds nothing → `TargetDoesNotExist`
    pub fn resolve(&self, path: &str) -> Result<Arc<dyn Mentionable>, AppError> {
        for route in &self.routes {
            let Some(captures) = route.pattern.captures(path) else {
                continue;
            };

            let Some(model_name) = &route.model_name else {
                return Err(AppError::NoModelForUrlPath(path.to_string()));
            };

            let model = self.models.get(model_name).ok_or_else(|| {
                AppError::BadUrlConfig(format!(
                    "route for '{}' names unregistered model '{}'",
                    path, model_name
                ))
            })?;

            let kwargs = self.build_kwargs(route, &captures);
            if kwargs.is_empty() {
                return Err(AppError::BadUrlConfig(format!(
                    "route for '{}' captures nothing to query by",
                    path
                )));
            }

            return match model.resolve_from_url_kwargs(&kwargs)? {
                Some(entity) => Ok(entity),
                None => Err(AppError::TargetDoesNotExist(path.to_string())),
            };
        }

        self.resolve_aux(path)
    }

    fn resolve_aux(&self, path: &str) -> Result<Arc<dyn Mentionable>, AppError> {
        match &self.aux {
            Some(aux) => match aux.resolve(path) {
                Ok(Some(entity)) => Ok(entity),
                Ok(None) => Err(AppError::TargetDoesNotExist(path.to_string())),
                Err(AppError::OptionalDependency(reason)) => {
                    tracing::debug!(path = %path, reason = %reason, "Aux resolver unavailable");
                    Err(AppError::TargetDoesNotExist(path.to_string()))
                }
                Err(e) => Err(e),
            },
            None => Err(AppError::TargetDoesNotExist(path.to_string())),
        }
    }

    fn build_kwargs(&self, route: &RouteEntry, captures: &regex::Captures) -> Vec<(String, String)> {
        match &route.mapping {
            ParamMapping::Named(pairs) => pairs
                .iter()
                .filter_map(|(capture, field)| {
                    captures
                        .name(capture)
                        .map(|m| (field.clone(), m.as_str().to_string()))
                })
                .collect(),
            ParamMapping::Positional(fields) => fields
                .iter()
                .enumerate()
                .filter_map(|(i, field)| {
                    captures
                        .get(i + 1)
                        .map(|m| (field.clone(), m.as_str().to_string()))
                })
                .collect(),
            ParamMapping::Identity => {
                let named: Vec<(String, String)> = route
                    .pattern
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        captures
                            .name(name)
                            .map(|m| (name.to_string(), m.as_str().to_string()))
                    })
                    .collect();
                if !named.is_empty() {
                    return named;
                }
                // Single unnamed group: query by the default field
                captures
                    .get(1)
                    .map(|m| vec![(self.default_field.clone(), m.as_str().to_string())])
                    .unwrap_or_default()
            }
        }
    }
}
