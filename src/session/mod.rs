//! Who is signed in, and what the backend knows about them.
//!
//! `SessionContext` is built once at start-up and passed explicitly to the
//! flows that need a signed-in user. It follows the auth provider through a
//! `Subscription`, so sign-ins and sign-outs made elsewhere show up on the
//! next `process_events()`.

pub mod events;
pub mod rest;

pub use events::{AuthEvent, Subscribers, Subscription};
pub use rest::RestAuthProvider;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::common::error::{AttendanceError, Result};
use crate::service::database::RemoteDatabase;
use crate::service::protocol::{NewUserProfile, Role, UserProfile};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
    pub id_token: String,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("uid", &self.uid)
            .field("email", &self.email)
            .field("id_token", &"<redacted>")
            .finish()
    }
}

pub trait AuthProvider: Send + Sync {
    fn create_account(&self, email: &str, password: &str) -> Result<Identity>;

    fn sign_in(&self, email: &str, password: &str) -> Result<Identity>;

    /// Exchange an OAuth provider credential (Google ID token) for an identity
    fn sign_in_with_token(&self, provider_token: &str) -> Result<Identity>;

    fn sign_out(&self) -> Result<()>;

    fn delete_account(&self, identity: &Identity) -> Result<()>;

    fn current_identity(&self) -> Option<Identity>;

    /// Resume a sign-in persisted by an earlier run
    fn restore(&self, identity: Identity) -> Result<()>;

    fn subscribe(&self) -> Subscription;
}

/// Profile fields collected at sign-up or on the complete-profile step
#[derive(Debug, Clone, PartialEq)]
pub struct SignupDetails {
    pub name: String,
    pub role: Role,
    pub student_id: Option<String>,
    pub subject: Option<String>,
}

impl SignupDetails {
    fn validate(&self) -> Result<()> {
        if self.name.trim().chars().count() < 2 {
            return Err(AttendanceError::Validation(
                "Name must be at least 2 characters long".into(),
            ));
        }
        if self.role == Role::Student
            && self.student_id.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(AttendanceError::Validation("Student ID is required for students".into()));
        }
        Ok(())
    }

    fn into_profile(self, identity: &Identity) -> NewUserProfile {
        NewUserProfile {
            firebase_id: identity.uid.clone(),
            email: identity.email.clone(),
            name: self.name.trim().to_string(),
            role: self.role,
            student_id: self.student_id.map(|s| s.trim().to_string()),
            subject: self.subject.map(|s| s.trim().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub profile: Option<UserProfile>,
    pub loading: bool,
}

pub struct SessionContext {
    auth: Arc<dyn AuthProvider>,
    db: Arc<dyn RemoteDatabase>,
    events: Subscription,
    identity: Option<Identity>,
    profile: Option<UserProfile>,
    loading: bool,
}

impl SessionContext {
    /// Subscribe to the provider, then resolve the initial identity and its
    /// profile. `loading` stays set until that first resolution finishes.
    pub fn start(auth: Arc<dyn AuthProvider>, db: Arc<dyn RemoteDatabase>) -> Result<Self> {
        let events = auth.subscribe();
        let mut context = Self {
            identity: auth.current_identity(),
            auth,
            db,
            events,
            profile: None,
            loading: true,
        };

        let resolved = context.refresh_profile().map(|_| ());
        context.loading = false;
        resolved?;

        // The initial identity is already resolved; skip its echo
        context.events.drain();
        Ok(context)
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        self.profile.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            identity: self.identity.clone(),
            profile: self.profile.clone(),
            loading: self.loading,
        }
    }

    pub fn auth(&self) -> &Arc<dyn AuthProvider> {
        &self.auth
    }

    pub fn database(&self) -> &Arc<dyn RemoteDatabase> {
        &self.db
    }

    /// Apply every pending auth event; returns how many were handled
    pub fn process_events(&mut self) -> Result<usize> {
        let events = self.events.drain();
        let handled = events.len();
        for event in events {
            match event {
                AuthEvent::SignedIn(identity) => {
                    tracing::debug!("Auth state changed: signed in as {}", identity.uid);
                    self.identity = Some(identity);
                    self.loading = true;
                    let resolved = self.refresh_profile().map(|_| ());
                    self.loading = false;
                    resolved?;
                }
                AuthEvent::SignedOut => {
                    tracing::debug!("Auth state changed: signed out");
                    self.identity = None;
                    self.profile = None;
                }
            }
        }
        Ok(handled)
    }

    pub fn refresh_profile(&mut self) -> Result<Option<&UserProfile>> {
        self.profile = match &self.identity {
            Some(identity) => self.db.get_user_by_external_id(&identity.uid)?,
            None => None,
        };
        Ok(self.profile.as_ref())
    }

    /// Create the identity, then its profile. If the profile write fails the
    /// identity is deleted again so no account is left without a profile.
    pub fn signup(&mut self, email: &str, password: &str, details: SignupDetails) -> Result<UserProfile> {
        details.validate()?;
        let identity = self.auth.create_account(email, password)?;
        tracing::info!("Created account {} for {}", identity.uid, email);

        match self.db.create_user(&details.into_profile(&identity)) {
            Ok(profile) => {
                self.process_events()?;
                self.identity = Some(identity);
                self.profile = Some(profile.clone());
                Ok(profile)
            }
            Err(e) => {
                tracing::warn!("Profile creation failed, removing account {}: {}", identity.uid, e);
                if let Err(cleanup) = self.auth.delete_account(&identity) {
                    tracing::warn!("Could not remove account {}: {}", identity.uid, cleanup);
                }
                self.process_events()?;
                self.identity = None;
                self.profile = None;
                Err(e)
            }
        }
    }

    /// Email sign-in. Fails with `ProfileIncomplete` when the identity has
    /// no profile yet; the identity stays signed in so the profile can be
    /// completed.
    pub fn login(&mut self, email: &str, password: &str) -> Result<UserProfile> {
        let identity = self.auth.sign_in(email, password)?;
        self.settle_sign_in(identity)
    }

    pub fn login_with_token(&mut self, provider_token: &str) -> Result<UserProfile> {
        let identity = self.auth.sign_in_with_token(provider_token)?;
        self.settle_sign_in(identity)
    }

    fn settle_sign_in(&mut self, identity: Identity) -> Result<UserProfile> {
        self.process_events()?;
        if self.identity.as_ref().map(|i| &i.uid) != Some(&identity.uid) {
            self.identity = Some(identity);
            self.refresh_profile()?;
        }
        match &self.profile {
            Some(profile) => {
                tracing::info!("Signed in as {} ({})", profile.name, profile.role);
                Ok(profile.clone())
            }
            None => Err(AttendanceError::ProfileIncomplete),
        }
    }

    /// Create the missing profile for an identity that signed in without one
    pub fn complete_profile(&mut self, details: SignupDetails) -> Result<UserProfile> {
        details.validate()?;
        let identity = self.identity.clone().ok_or(AttendanceError::NotSignedIn)?;
        if let Some(existing) = &self.profile {
            return Ok(existing.clone());
        }
        let profile = self.db.create_user(&details.into_profile(&identity))?;
        self.profile = Some(profile.clone());
        Ok(profile)
    }

    /// Resume a persisted identity
    pub fn resume(&mut self, identity: Identity) -> Result<Option<&UserProfile>> {
        self.auth.restore(identity.clone())?;
        self.process_events()?;
        if self.identity.is_none() {
            self.identity = Some(identity);
            self.refresh_profile()?;
        }
        Ok(self.profile.as_ref())
    }

    /// The profile is cleared before the provider signs out, so nothing can
    /// observe a signed-out identity that still carries a profile.
    pub fn logout(&mut self) -> Result<()> {
        self.profile = None;
        self.auth.sign_out()?;
        self.process_events()?;
        self.identity = None;
        tracing::info!("Signed out");
        Ok(())
    }

    pub fn require_profile(&self) -> Result<&UserProfile> {
        if self.identity.is_none() {
            return Err(AttendanceError::NotSignedIn);
        }
        self.profile.as_ref().ok_or(AttendanceError::ProfileIncomplete)
    }

    pub fn require_student(&self) -> Result<&UserProfile> {
        let profile = self.require_profile()?;
        if profile.role != Role::Student {
            return Err(AttendanceError::Validation(
                "This action is only available to students".into(),
            ));
        }
        Ok(profile)
    }

    pub fn require_teacher(&self) -> Result<&UserProfile> {
        let profile = self.require_profile()?;
        if profile.role != Role::Teacher {
            return Err(AttendanceError::Validation(
                "This action is only available to teachers".into(),
            ));
        }
        Ok(profile)
    }
}
