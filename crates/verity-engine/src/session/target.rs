use crate::config::schema::TargetConfig;
use regex::Regex;
use url::Url;
use verity_common::error::PipelineError;

/// Where a session navigates, and the id of the resource it watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub url: String,
    pub resource_id: Option<String>,
}

/// Turns a user-supplied target (full URL or bare resource id) into a URL.
#[derive(Debug, Clone)]
pub struct TargetResolver {
    url_template: Option<String>,
    resource_id: Regex,
}

impl TargetResolver {
    pub fn from_config(config: &TargetConfig) -> Result<Self, PipelineError> {
        let resource_id = Regex::new(&config.resource_id_pattern).map_err(|e| {
            PipelineError::InvalidTarget(format!("bad resource_id_pattern: {}", e))
        })?;
        Ok(Self {
            url_template: config.url_template.clone(),
            resource_id,
        })
    }

    pub fn resolve(&self, target: &str) -> Result<ResolvedTarget, PipelineError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(PipelineError::InvalidTarget("empty target".into()));
        }

        if target.starts_with("http://") || target.starts_with("https://") {
            let url = Url::parse(target)
                .map_err(|e| PipelineError::InvalidTarget(format!("{}: {}", target, e)))?;
            let resource_id = self
                .resource_id
                .captures(url.as_str())
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string());
            return Ok(ResolvedTarget {
                url: url.to_string(),
                resource_id,
            });
        }

        let is_bare_id = target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        match (&self.url_template, is_bare_id) {
            (Some(template), true) => {
                let url = template.replace("{id}", target);
                Url::parse(&url)
                    .map_err(|e| PipelineError::InvalidTarget(format!("{}: {}", url, e)))?;
                Ok(ResolvedTarget {
                    url,
                    resource_id: Some(target.to_string()),
                })
            }
            (None, true) => Err(PipelineError::InvalidTarget(format!(
                "'{}' is not a URL and no url_template is configured",
                target
            ))),
            (_, false) => Err(PipelineError::InvalidTarget(format!(
                "'{}' is neither an http(s) URL nor a resource id",
                target
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> TargetResolver {
        TargetResolver::from_config(&TargetConfig::default()).unwrap()
    }

    #[test]
    fn full_url_extracts_resource_id() {
        let t = resolver()
            .resolve("https://docs.google.com/spreadsheets/d/1AbC_x-9/edit#gid=0")
            .unwrap();
        assert_eq!(t.resource_id.as_deref(), Some("1AbC_x-9"));
        assert!(t.url.starts_with("https://docs.google.com/"));
    }

    #[test]
    fn bare_id_expands_through_template() {
        let t = resolver().resolve("1AbC_x-9").unwrap();
        assert_eq!(t.url, "https://docs.google.com/spreadsheets/d/1AbC_x-9/edit");
        assert_eq!(t.resource_id.as_deref(), Some("1AbC_x-9"));
    }

    #[test]
    fn rejects_other_shapes() {
        let r = resolver();
        assert!(r.resolve("").is_err());
        assert!(r.resolve("ftp://example.com/x").is_err());
        assert!(r.resolve("not a url").is_err());

        let no_template = TargetResolver::from_config(&TargetConfig {
            url_template: None,
            ..TargetConfig::default()
        })
        .unwrap();
        assert!(no_template.resolve("abc").is_err());
    }
}
