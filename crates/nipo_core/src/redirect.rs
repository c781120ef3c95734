//! crates/nipo_core/src/redirect.rs
//!
//! Pure redirect rules evaluated after a profile becomes known.

use crate::domain::Profile;

/// Where the session manager may send the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectRoutes {
    pub voting: String,
    pub dashboard: String,
    /// Route prefixes where the user is presumed to be on purpose.
    pub specific_areas: Vec<String>,
}

impl Default for RedirectRoutes {
    fn default() -> Self {
        Self {
            voting: "/vote".into(),
            dashboard: "/dashboard".into(),
            specific_areas: [
                "/professores",
                "/modulos",
                "/conquistas",
                "/devocional",
                "/perfil",
                "/vote",
                "/instrumentos",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// The outcome of a redirect evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectDecision {
    pub should_redirect: bool,
    pub target: Option<String>,
}

impl RedirectDecision {
    pub fn stay() -> Self {
        Self {
            should_redirect: false,
            target: None,
        }
    }

    pub fn to(target: impl Into<String>) -> Self {
        Self {
            should_redirect: true,
            target: Some(target.into()),
        }
    }

    /// True when this decision sends the user to the generic dashboard.
    pub fn is_dashboard(&self, routes: &RedirectRoutes) -> bool {
        self.target.as_deref() == Some(routes.dashboard.as_str())
    }
}

/// `location` is under `prefix` when it equals it or continues with a new path segment.
fn is_under(location: &str, prefix: &str) -> bool {
    match location.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(['/', '?', '#']),
        None => false,
    }
}

/// Evaluates the redirect rules in priority order.
///
/// `already_redirected` is the per-identity flag kept by the session manager.
pub fn decide(
    routes: &RedirectRoutes,
    profile: &Profile,
    location: &str,
    already_redirected: bool,
    force: bool,
) -> RedirectDecision {
    if !profile.has_voted {
        if is_under(location, &routes.voting) {
            return RedirectDecision::stay();
        }
        return RedirectDecision::to(routes.voting.clone());
    }

    if routes
        .specific_areas
        .iter()
        .any(|area| is_under(location, area))
    {
        return RedirectDecision::stay();
    }

    if !already_redirected || force {
        return RedirectDecision::to(routes.dashboard.clone());
    }

    RedirectDecision::stay()
}
