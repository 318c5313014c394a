//! In-process backend
//!
//! Holds the same entities the server persists and enforces the same
//! access rules, so hydration and sessions behave identically against it.
//! A `Database` can be loaded from and saved to a JSON fixture file.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{validate_email, EditTerm, Gateway, GatewayError, GatewayResult, PutStudiableTerm};
use crate::sets::*;

/// Maximum number of entries returned by the recent listings
pub const RECENT_LIMIT: usize = 16;

/// Everything the backend stores
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub study_sets: Vec<StudySet>,
    #[serde(default)]
    pub folders: Vec<Folder>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub studiable_terms: Vec<StudiableTerm>,
    #[serde(default)]
    pub classes: Vec<Class>,
    #[serde(default)]
    pub whitelist: Vec<WhitelistedEmail>,
    #[serde(default)]
    pub login_attempts: Vec<LoginAttempt>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a database fixture from file
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save the database to file
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
    }

    /// Record a refused sign-in for the admin listing
    pub fn record_login_attempt(&mut self, email: &str) {
        self.login_attempts.push(LoginAttempt {
            email: email.to_string(),
            attempted_at: Utc::now(),
        });
    }

    fn study_set(&self, id: &str) -> GatewayResult<&StudySet> {
        self.study_sets
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| GatewayError::NotFound(format!("study set {}", id)))
    }

    fn user(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    /// Container for (user, entity), created on first view
    fn touch_container(&mut self, user_id: &str, entity_id: &str, kind: EntityKind) -> Container {
        let now = Utc::now();
        if let Some(existing) = self
            .containers
            .iter_mut()
            .find(|c| c.user_id == user_id && c.entity_id == entity_id && c.kind == kind)
        {
            existing.viewed_at = now;
            return existing.clone();
        }

        let mut container = Container::new(user_id, entity_id, kind);
        container.viewed_at = now;
        self.containers.push(container.clone());
        container
    }

    fn upsert_studiable_term(&mut self, user_id: &str, input: PutStudiableTerm) {
        match self
            .studiable_terms
            .iter_mut()
            .find(|t| t.user_id == user_id && t.term_id == input.id)
        {
            Some(existing) => {
                existing.correctness = input.correctness;
                existing.appeared_in_round = input.appeared_in_round;
                existing.mode = input.mode;
                existing.experience_id = input.experience_id;
            }
            None => self.studiable_terms.push(StudiableTerm {
                user_id: user_id.to_string(),
                term_id: input.id,
                experience_id: input.experience_id,
                mode: input.mode,
                correctness: input.correctness,
                appeared_in_round: input.appeared_in_round,
            }),
        }
    }

    fn recent_entity(&self, container: &Container, viewer: &str) -> Option<RecentEntity> {
        match container.kind {
            EntityKind::StudySet => {
                let set = self.study_sets.iter().find(|s| s.id == container.entity_id)?;
                if !set.is_readable_by(Some(viewer)) {
                    return None;
                }
                Some(RecentEntity {
                    id: set.id.clone(),
                    kind: EntityKind::StudySet,
                    user_id: set.user_id.clone(),
                    title: set.title.clone(),
                    viewed_at: container.viewed_at,
                    visibility: Some(set.visibility),
                    item_count: set.terms.len(),
                })
            }
            EntityKind::Folder => {
                let folder = self.folders.iter().find(|f| f.id == container.entity_id)?;
                Some(RecentEntity {
                    id: folder.id.clone(),
                    kind: EntityKind::Folder,
                    user_id: folder.user_id.clone(),
                    title: folder.title.clone(),
                    viewed_at: container.viewed_at,
                    visibility: None,
                    item_count: folder.study_set_ids.len(),
                })
            }
        }
    }
}

/// Gateway over a shared in-process `Database`, acting as one viewer
#[derive(Clone)]
pub struct MemoryGateway {
    db: Arc<Mutex<Database>>,
    viewer: Option<String>,
}

impl MemoryGateway {
    pub fn new(db: Database, viewer: Option<&str>) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            viewer: viewer.map(str::to_string),
        }
    }

    /// Another viewer over the same backing database
    pub fn as_viewer(&self, viewer: Option<&str>) -> Self {
        Self {
            db: Arc::clone(&self.db),
            viewer: viewer.map(str::to_string),
        }
    }

    pub fn viewer(&self) -> Option<&str> {
        self.viewer.as_deref()
    }

    /// Snapshot of the backing database
    pub fn snapshot(&self) -> Database {
        self.db().clone()
    }

    /// Mutate the backing database directly (seeding, out-of-band changes)
    pub fn with_database<R>(&self, f: impl FnOnce(&mut Database) -> R) -> R {
        f(&mut self.db())
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_viewer(&self) -> GatewayResult<&str> {
        self.viewer.as_deref().ok_or(GatewayError::Unauthorized)
    }

    fn require_admin(&self, db: &Database) -> GatewayResult<()> {
        let viewer = self.require_viewer()?;
        match db.user(viewer) {
            Some(user) if user.is_admin => Ok(()),
            _ => Err(GatewayError::Forbidden("admin only".to_string())),
        }
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn fetch_study_set(&self, id: &str, authed: bool) -> GatewayResult<StudySetWithContainer> {
        let viewer = if authed { Some(self.require_viewer()?) } else { None };
        let mut db = self.db();

        let set = db.study_set(id)?.clone();
        if !set.is_readable_by(viewer) {
            return Err(GatewayError::Forbidden(format!("study set {} is private", id)));
        }

        let container = match viewer {
            Some(viewer) => {
                let mut container = db.touch_container(viewer, id, EntityKind::StudySet);
                container.studiable_terms = db
                    .studiable_terms
                    .iter()
                    .filter(|t| t.user_id == viewer && set.term(&t.term_id).is_some())
                    .cloned()
                    .collect();
                Some(container)
            }
            None => None,
        };

        Ok(StudySetWithContainer { set, container })
    }

    async fn put_studiable_term(&self, input: PutStudiableTerm) -> GatewayResult<()> {
        let viewer = self.require_viewer()?.to_string();
        let mut db = self.db();

        let term_exists = db
            .study_sets
            .iter()
            .any(|s| s.terms.iter().any(|t| t.id == input.id));
        if !term_exists {
            return Err(GatewayError::NotFound(format!("term {}", input.id)));
        }
        let owns_container = db
            .containers
            .iter()
            .any(|c| c.id == input.experience_id && c.user_id == viewer);
        if !owns_container {
            return Err(GatewayError::NotFound(format!("container {}", input.experience_id)));
        }

        db.upsert_studiable_term(&viewer, input);
        Ok(())
    }

    async fn recent(&self, kind: EntityKind, exclude: &[String]) -> GatewayResult<Vec<RecentEntity>> {
        let viewer = self.require_viewer()?;
        let db = self.db();

        let mut containers: Vec<&Container> = db
            .containers
            .iter()
            .filter(|c| c.user_id == viewer && c.kind == kind && !exclude.contains(&c.entity_id))
            .collect();
        containers.sort_by(|a, b| b.viewed_at.cmp(&a.viewed_at));

        Ok(containers
            .into_iter()
            .filter_map(|c| db.recent_entity(c, viewer))
            .take(RECENT_LIMIT)
            .collect())
    }

    async fn edit_term(&self, input: EditTerm) -> GatewayResult<()> {
        let viewer = self.require_viewer()?;
        let mut db = self.db();

        let set = db
            .study_sets
            .iter_mut()
            .find(|s| s.id == input.study_set_id)
            .ok_or_else(|| GatewayError::NotFound(format!("study set {}", input.study_set_id)))?;
        if set.user_id != viewer {
            return Err(GatewayError::Forbidden("only the owner can edit terms".to_string()));
        }
        let term = set
            .terms
            .iter_mut()
            .find(|t| t.id == input.id)
            .ok_or_else(|| GatewayError::NotFound(format!("term {}", input.id)))?;

        term.word = input.word;
        term.definition = input.definition;
        Ok(())
    }

    async fn add_class_entities(
        &self,
        class_id: &str,
        kind: EntityKind,
        entities: &[String],
    ) -> GatewayResult<()> {
        let viewer = self.require_viewer()?;
        let mut db = self.db();

        for entity in entities {
            let exists = match kind {
                EntityKind::StudySet => db.study_sets.iter().any(|s| &s.id == entity),
                EntityKind::Folder => db.folders.iter().any(|f| &f.id == entity),
            };
            if !exists {
                return Err(GatewayError::NotFound(format!("{:?} {}", kind, entity)));
            }
        }

        let class = db
            .classes
            .iter_mut()
            .find(|c| c.id == class_id)
            .ok_or_else(|| GatewayError::NotFound(format!("class {}", class_id)))?;
        if !class.teacher_ids.iter().any(|t| t == viewer) {
            return Err(GatewayError::Forbidden("only teachers can manage a class".to_string()));
        }

        let target = match kind {
            EntityKind::StudySet => &mut class.study_set_ids,
            EntityKind::Folder => &mut class.folder_ids,
        };
        for entity in entities {
            if !target.contains(entity) {
                target.push(entity.clone());
            }
        }
        Ok(())
    }

    async fn remove_class_entity(
        &self,
        class_id: &str,
        kind: EntityKind,
        entity_id: &str,
    ) -> GatewayResult<()> {
        let viewer = self.require_viewer()?;
        let mut db = self.db();

        let class = db
            .classes
            .iter_mut()
            .find(|c| c.id == class_id)
            .ok_or_else(|| GatewayError::NotFound(format!("class {}", class_id)))?;
        if !class.teacher_ids.iter().any(|t| t == viewer) {
            return Err(GatewayError::Forbidden("only teachers can manage a class".to_string()));
        }

        match kind {
            EntityKind::StudySet => class.study_set_ids.retain(|id| id != entity_id),
            EntityKind::Folder => class.folder_ids.retain(|id| id != entity_id),
        }
        Ok(())
    }

    async fn get_whitelist(&self) -> GatewayResult<Whitelist> {
        let db = self.db();
        self.require_admin(&db)?;

        Ok(Whitelist {
            whitelist: db.whitelist.clone(),
            attempts: db.login_attempts.clone(),
        })
    }

    async fn whitelist_email(&self, email: &str, delete: bool) -> GatewayResult<()> {
        let mut db = self.db();
        self.require_admin(&db)?;
        validate_email(email)?;

        if delete {
            db.whitelist.retain(|w| w.email != email);
        } else if !db.whitelist.iter().any(|w| w.email == email) {
            db.whitelist.push(WhitelistedEmail {
                email: email.to_string(),
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn allow_failed_login(&self, email: &str, allow: bool) -> GatewayResult<()> {
        let mut db = self.db();
        self.require_admin(&db)?;

        db.login_attempts.retain(|a| a.email != email);
        if allow && !db.whitelist.iter().any(|w| w.email == email) {
            db.whitelist.push(WhitelistedEmail {
                email: email.to_string(),
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn set_enabled_flags(&self, user_id: &str, flags: EnabledFeatures) -> GatewayResult<()> {
        let mut db = self.db();
        self.require_admin(&db)?;

        if flags.bits() & !EnabledFeatures::all().bits() != 0 {
            return Err(GatewayError::Validation(format!("Unknown feature bits: {:#x}", flags.bits())));
        }
        let user = db
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| GatewayError::NotFound(format!("user {}", user_id)))?;
        user.flags = flags;
        Ok(())
    }

    async fn viewer_flags(&self) -> GatewayResult<EnabledFeatures> {
        let Some(viewer) = self.viewer.as_deref() else {
            return Ok(EnabledFeatures::empty());
        };
        Ok(self.db().user(viewer).map(|u| u.flags).unwrap_or_default())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Owner "alice" with a public and a private set, admin "root", student "bob"
    pub(crate) fn fixture() -> Database {
        let mut db = Database::new();
        db.users = vec![
            User {
                id: "alice".into(),
                username: "alice".into(),
                email: "alice@example.com".into(),
                is_admin: false,
                flags: EnabledFeatures::EXTENDED_FEEDBACK_BANK,
            },
            User {
                id: "bob".into(),
                username: "bob".into(),
                email: "bob@example.com".into(),
                is_admin: false,
                flags: EnabledFeatures::empty(),
            },
            User {
                id: "root".into(),
                username: "root".into(),
                email: "root@example.com".into(),
                is_admin: true,
                flags: EnabledFeatures::empty(),
            },
        ];

        let mut public = StudySet::new("public", "alice", "Capitals");
        for (rank, (id, word, definition)) in [
            ("a", "France", "Paris"),
            ("b", "Spain", "Madrid"),
            ("c", "Italy", "Rome"),
        ]
        .into_iter()
        .enumerate()
        {
            let mut term = Term::new("public", word, definition, rank as i32);
            term.id = id.into();
            public.terms.push(term);
        }

        let mut private = StudySet::new("private", "alice", "Diary words");
        private.visibility = Visibility::Private;
        let mut term = Term::new("private", "secret", "hidden", 0);
        term.id = "p1".into();
        private.terms.push(term);

        db.study_sets = vec![public, private];
        db.folders = vec![Folder {
            id: "folder".into(),
            user_id: "alice".into(),
            title: "Geography".into(),
            slug: "geography".into(),
            description: String::new(),
            study_set_ids: vec!["public".into()],
        }];
        db.classes = vec![Class {
            id: "class".into(),
            name: "Period 1".into(),
            teacher_ids: vec!["alice".into()],
            study_set_ids: Vec::new(),
            folder_ids: Vec::new(),
        }];
        db
    }

    fn put(experience_id: &str, correctness: i32) -> PutStudiableTerm {
        PutStudiableTerm {
            id: "a".into(),
            experience_id: experience_id.into(),
            mode: StudyMode::Learn,
            correctness,
            appeared_in_round: Some(1),
        }
    }

    #[tokio::test]
    async fn test_missing_set_is_not_found() {
        let gateway = MemoryGateway::new(fixture(), Some("bob"));
        let err = gateway.fetch_study_set("nope", true).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn test_private_set_is_forbidden_not_missing() {
        let gateway = MemoryGateway::new(fixture(), Some("bob"));
        let err = gateway.fetch_study_set("private", true).await.unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden(_)));

        let anonymous = gateway.as_viewer(None);
        let err = anonymous.fetch_study_set("private", false).await.unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden(_)));

        let owner = gateway.as_viewer(Some("alice"));
        assert!(owner.fetch_study_set("private", true).await.is_ok());
    }

    #[tokio::test]
    async fn test_public_fetch_has_no_container() {
        let gateway = MemoryGateway::new(fixture(), None);
        let data = gateway.fetch_study_set("public", false).await.unwrap();
        assert!(data.container.is_none());

        let err = gateway.fetch_study_set("public", true).await.unwrap_err();
        assert_eq!(err, GatewayError::Unauthorized);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let gateway = MemoryGateway::new(fixture(), Some("bob"));
        let container = gateway
            .fetch_study_set("public", true)
            .await
            .unwrap()
            .container
            .unwrap();

        gateway.put_studiable_term(put(&container.id, 2)).await.unwrap();
        let once = gateway.snapshot().studiable_terms;
        gateway.put_studiable_term(put(&container.id, 2)).await.unwrap();
        let twice = gateway.snapshot().studiable_terms;

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
        assert_eq!(twice[0].correctness, 2);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_correctness_and_round() {
        let gateway = MemoryGateway::new(fixture(), Some("bob"));
        let container = gateway
            .fetch_study_set("public", true)
            .await
            .unwrap()
            .container
            .unwrap();

        gateway.put_studiable_term(put(&container.id, 1)).await.unwrap();
        let mut second = put(&container.id, -1);
        second.appeared_in_round = Some(3);
        gateway.put_studiable_term(second).await.unwrap();

        let terms = gateway.snapshot().studiable_terms;
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].correctness, -1);
        assert_eq!(terms[0].appeared_in_round, Some(3));

        let refetched = gateway.fetch_study_set("public", true).await.unwrap();
        assert_eq!(refetched.container.unwrap().studiable_terms.len(), 1);
    }

    #[tokio::test]
    async fn test_recent_orders_by_view_and_hides_private() {
        let gateway = MemoryGateway::new(fixture(), Some("bob"));
        gateway.fetch_study_set("public", true).await.unwrap();

        // A container left over from when the set was readable
        {
            let mut db = gateway.db();
            db.containers.push(Container::new("bob", "private", EntityKind::StudySet));
        }

        let recent = gateway.recent(EntityKind::StudySet, &[]).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "public");
        assert_eq!(recent[0].item_count, 3);

        let excluded = gateway
            .recent(EntityKind::StudySet, &["public".to_string()])
            .await
            .unwrap();
        assert!(excluded.is_empty());
    }

    #[tokio::test]
    async fn test_recent_is_capped() {
        let mut db = fixture();
        for i in 0..20 {
            let id = format!("set-{}", i);
            db.study_sets.push(StudySet::new(&id, "alice", "Bulk"));
            let mut container = Container::new("bob", &id, EntityKind::StudySet);
            container.viewed_at = Utc::now() + chrono::Duration::seconds(i);
            db.containers.push(container);
        }
        let gateway = MemoryGateway::new(db, Some("bob"));

        let recent = gateway.recent(EntityKind::StudySet, &[]).await.unwrap();
        assert_eq!(recent.len(), RECENT_LIMIT);
        assert_eq!(recent[0].id, "set-19");
    }

    #[tokio::test]
    async fn test_class_mutations_require_teacher() {
        let gateway = MemoryGateway::new(fixture(), Some("alice"));
        gateway
            .add_class_entities("class", EntityKind::StudySet, &["public".to_string()])
            .await
            .unwrap();
        gateway
            .add_class_entities("class", EntityKind::StudySet, &["public".to_string()])
            .await
            .unwrap();
        assert_eq!(gateway.snapshot().classes[0].study_set_ids, vec!["public"]);

        let student = gateway.as_viewer(Some("bob"));
        let err = student
            .remove_class_entity("class", EntityKind::StudySet, "public")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden(_)));

        gateway
            .remove_class_entity("class", EntityKind::StudySet, "public")
            .await
            .unwrap();
        assert!(gateway.snapshot().classes[0].study_set_ids.is_empty());

        let err = gateway
            .add_class_entities("missing", EntityKind::Folder, &["folder".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_whitelist_admin_flow() {
        let mut db = fixture();
        db.record_login_attempt("late@example.com");
        let admin = MemoryGateway::new(db, Some("root"));

        let err = admin.whitelist_email("bogus", false).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));

        admin.whitelist_email("new@example.com", false).await.unwrap();
        admin.allow_failed_login("late@example.com", true).await.unwrap();

        let whitelist = admin.get_whitelist().await.unwrap();
        assert_eq!(whitelist.whitelist.len(), 2);
        assert!(whitelist.attempts.is_empty());

        admin.whitelist_email("new@example.com", true).await.unwrap();
        assert_eq!(admin.get_whitelist().await.unwrap().whitelist.len(), 1);

        let student = admin.as_viewer(Some("bob"));
        assert!(matches!(
            student.get_whitelist().await.unwrap_err(),
            GatewayError::Forbidden(_)
        ));
    }

    #[tokio::test]
    async fn test_set_enabled_flags() {
        let admin = MemoryGateway::new(fixture(), Some("root"));
        admin
            .set_enabled_flags("bob", EnabledFeatures::EXTENDED_FEEDBACK_BANK)
            .await
            .unwrap();
        let bob = admin.as_viewer(Some("bob"));
        assert_eq!(
            bob.viewer_flags().await.unwrap(),
            EnabledFeatures::EXTENDED_FEEDBACK_BANK
        );

        let err = admin
            .set_enabled_flags("bob", EnabledFeatures::from_bits_retain(0b100))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn test_edit_term_owner_only() {
        let owner = MemoryGateway::new(fixture(), Some("alice"));
        let input = EditTerm {
            id: "a".into(),
            study_set_id: "public".into(),
            word: "France".into(),
            definition: "Paris, Île-de-France".into(),
        };
        owner.edit_term(input.clone()).await.unwrap();
        assert_eq!(
            owner.snapshot().study_sets[0].terms[0].definition,
            "Paris, Île-de-France"
        );

        let student = owner.as_viewer(Some("bob"));
        assert!(matches!(
            student.edit_term(input).await.unwrap_err(),
            GatewayError::Forbidden(_)
        ));
    }

    #[test]
    fn test_database_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.json");
        fixture().save(&path).unwrap();

        let loaded = Database::load(&path).unwrap();
        assert_eq!(loaded.study_sets.len(), 2);
        assert!(Database::load(&dir.path().join("missing.json")).unwrap().users.is_empty());
    }
}
