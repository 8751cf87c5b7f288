//! View access decisions.
//!
//! [`AccessGuard::evaluate`] maps a session snapshot and a requested view
//! to a [`GuardDecision`]. Navigation itself is the caller's job.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::config::RoutesConfig;
use crate::session::{AuthState, SessionSnapshot};
use crate::types::{Role, UnknownRole, View};

/// Route table errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// A role would be redirected away from its own default view.
    #[error("Role {role} is not allowed on its default view {view}")]
    RedirectLoop {
        /// Role that loops.
        role: Role,
        /// Its default view.
        view: View,
    },

    /// The login view is not public.
    #[error("Login view {0} must be public")]
    LoginViewNotPublic(View),

    /// Unknown role name in configuration.
    #[error(transparent)]
    UnknownRole(#[from] UnknownRole),
}

/// What the caller should do with a navigation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Render the requested view.
    Allow,
    /// Navigate to another view instead.
    Redirect(View),
    /// Session not settled yet; show a loading placeholder.
    Pending,
}

/// Classification of views.
///
/// Views that are neither public nor listed as guarded are guarded with no
/// role requirement. Role requirements apply to a view and everything
/// below it; the longest matching prefix wins.
#[derive(Debug, Clone)]
pub struct RouteTable {
    login_view: View,
    public: BTreeSet<View>,
    login_only: BTreeSet<View>,
    guarded: BTreeMap<View, Vec<Role>>,
}

impl RouteTable {
    /// Empty table with only `login_view` public.
    #[must_use]
    pub fn new(login_view: impl Into<View>) -> Self {
        let login_view = login_view.into();
        let mut public = BTreeSet::new();
        public.insert(login_view.clone());
        Self {
            login_view,
            public,
            login_only: BTreeSet::new(),
            guarded: BTreeMap::new(),
        }
    }

    /// Build and validate a table from configuration.
    ///
    /// # Errors
    ///
    /// Returns error on unknown role names or a table that would loop.
    pub fn from_config(config: &RoutesConfig) -> Result<Self, GuardError> {
        let mut table = Self::new(View::new(config.login_view.as_str()));
        for view in &config.public_views {
            table = table.public(view.as_str());
        }
        for view in &config.login_only_views {
            table = table.login_only(view.as_str());
        }
        for (view, roles) in &config.guarded {
            let roles = roles
                .iter()
                .map(|r| r.parse::<Role>())
                .collect::<Result<Vec<_>, _>>()?;
            table = table.guard(view.as_str(), roles);
        }
        table.validate()?;
        Ok(table)
    }

    /// Mark a view public.
    #[must_use]
    pub fn public(mut self, view: impl Into<View>) -> Self {
        self.public.insert(view.into());
        self
    }

    /// Mark a view public and login-only.
    #[must_use]
    pub fn login_only(mut self, view: impl Into<View>) -> Self {
        let view = view.into();
        self.public.insert(view.clone());
        self.login_only.insert(view);
        self
    }

    /// Require one of `roles` for a view (empty = any signed-in user).
    #[must_use]
    pub fn guard(mut self, view: impl Into<View>, roles: impl IntoIterator<Item = Role>) -> Self {
        self.guarded.insert(view.into(), roles.into_iter().collect());
        self
    }

    /// Check that no state can redirect in a loop.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), GuardError> {
        if !self.public.contains(&self.login_view) {
            return Err(GuardError::LoginViewNotPublic(self.login_view.clone()));
        }
        for role in Role::ALL {
            let view = role.default_view();
            if self.login_only.contains(&view) || !self.permits(&view, role) {
                return Err(GuardError::RedirectLoop { role, view });
            }
        }
        Ok(())
    }

    /// Where unauthenticated users are sent.
    #[must_use]
    pub const fn login_view(&self) -> &View {
        &self.login_view
    }

    /// Whether `view` renders without a session.
    #[must_use]
    pub fn is_public(&self, view: &View) -> bool {
        self.public.contains(view)
    }

    /// Whether signed-in users are redirected away from `view`.
    #[must_use]
    pub fn is_login_only(&self, view: &View) -> bool {
        self.login_only.contains(view)
    }

    /// Roles required for `view`. Empty means any signed-in user.
    #[must_use]
    pub fn required_roles(&self, view: &View) -> &[Role] {
        let mut path = view.path();
        loop {
            if let Some(roles) = self.guarded.get(&View::new(path)) {
                return roles;
            }
            match path.rfind('/') {
                Some(0) | None => return &[],
                Some(idx) => path = &path[..idx],
            }
        }
    }

    fn permits(&self, view: &View, role: Role) -> bool {
        let required = self.required_roles(view);
        required.is_empty() || required.contains(&role)
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        let config = RoutesConfig::default();
        let mut table = Self::new(View::new(config.login_view.as_str()));
        for view in &config.public_views {
            table = table.public(view.as_str());
        }
        for view in &config.login_only_views {
            table = table.login_only(view.as_str());
        }
        for role in Role::ALL {
            table = table.guard(role.default_view(), [role]);
        }
        table.guard("/dashboard", [])
    }
}

/// Decides what a navigation request renders.
#[derive(Debug, Clone, Default)]
pub struct AccessGuard {
    routes: RouteTable,
}

impl AccessGuard {
    /// Create a guard over a route table.
    #[must_use]
    pub const fn new(routes: RouteTable) -> Self {
        Self { routes }
    }

    /// The route table.
    #[must_use]
    pub const fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Decide what `view` renders given `snapshot`.
    #[must_use]
    pub fn evaluate(&self, snapshot: &SessionSnapshot, view: &View) -> GuardDecision {
        match snapshot.state {
            AuthState::Initializing | AuthState::Authenticating => GuardDecision::Pending,

            AuthState::Unauthenticated => {
                if self.routes.is_public(view) {
                    GuardDecision::Allow
                } else {
                    GuardDecision::Redirect(self.routes.login_view.clone())
                }
            }

            AuthState::Authenticated | AuthState::Refreshing => {
                let Some(role) = snapshot.role() else {
                    return GuardDecision::Redirect(self.routes.login_view.clone());
                };

                if self.routes.is_login_only(view) {
                    GuardDecision::Redirect(role.default_view())
                } else if self.routes.is_public(view) || self.routes.permits(view, role) {
                    GuardDecision::Allow
                } else {
                    tracing::debug!(%view, %role, "View denied, redirecting to default view");
                    GuardDecision::Redirect(role.default_view())
                }
            }
        }
    }
}
