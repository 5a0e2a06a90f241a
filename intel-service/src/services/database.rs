//! MongoDB access and the store traits the pipeline consumes.
//!
//! Resolvers and the graph walker only see `ObjectStore`/`PrincipalStore`;
//! `MongoDb` is the production implementation and `MemoryStore` the
//! in-process fake used by tests.

use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{self, doc, oid::ObjectId, Document},
    options::{FindOptions, IndexOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::auth::permissions::SourcePredicate;
use crate::models::{Relationship, Role, ThreatObject, TloType, User};

/// Optional narrowing applied to list/count queries on top of the
/// visibility predicate.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<String>,
    pub campaign: Option<String>,
    pub value_contains: Option<String>,
    pub limit: i64,
    pub offset: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch by id with no visibility constraint. Callers are responsible
    /// for gating the result through `can_access`.
    async fn fetch(&self, tlo: TloType, id: &str) -> Result<Option<ThreatObject>, AppError>;

    /// Fetch by id under a visibility predicate; an invisible object is
    /// indistinguishable from a missing one.
    async fn fetch_visible(
        &self,
        tlo: TloType,
        id: &str,
        predicate: &SourcePredicate,
    ) -> Result<Option<ThreatObject>, AppError>;

    async fn find(
        &self,
        tlo: TloType,
        filter: &ListFilter,
        predicate: &SourcePredicate,
    ) -> Result<Vec<ThreatObject>, AppError>;

    async fn count(
        &self,
        tlo: TloType,
        filter: &ListFilter,
        predicate: &SourcePredicate,
    ) -> Result<u64, AppError>;

    async fn distinct(
        &self,
        tlo: TloType,
        field: &str,
        predicate: &SourcePredicate,
    ) -> Result<Vec<String>, AppError>;

    async fn push_relationship(
        &self,
        tlo: TloType,
        id: &str,
        rel: &Relationship,
    ) -> Result<bool, AppError>;

    async fn pull_relationship(
        &self,
        tlo: TloType,
        id: &str,
        target_type: &str,
        target_id: &str,
        label: &str,
    ) -> Result<bool, AppError>;

    async fn set_status(&self, tlo: TloType, id: &str, status: &str) -> Result<bool, AppError>;

    async fn delete(&self, tlo: TloType, id: &str) -> Result<bool, AppError>;
}

#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn user_by_id(&self, id: &str) -> Result<Option<User>, AppError>;
    async fn user_by_username(&self, username: &str) -> Result<Option<User>, AppError>;
    async fn roles_by_names(&self, names: &[String]) -> Result<Vec<Role>, AppError>;
}

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(uri = %uri, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB at {}: {}", uri, e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes");

        for tlo in TloType::ALL {
            let collection = self.tlo_collection(tlo);

            let modified_index = IndexModel::builder()
                .keys(doc! { "modified": -1 })
                .options(
                    IndexOptions::builder()
                        .name("modified_desc".to_string())
                        .build(),
                )
                .build();
            collection.create_index(modified_index, None).await?;

            let source_index = IndexModel::builder()
                .keys(doc! { "source.name": 1 })
                .options(
                    IndexOptions::builder()
                        .name("source_name_lookup".to_string())
                        .build(),
                )
                .build();
            collection.create_index(source_index, None).await?;
        }

        let username_index = IndexModel::builder()
            .keys(doc! { "username": 1 })
            .options(
                IndexOptions::builder()
                    .name("username_unique".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.users().create_index(username_index, None).await?;

        tracing::info!("MongoDB indexes ready");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::from(e)
            })?;
        Ok(())
    }

    pub fn tlo_collection(&self, tlo: TloType) -> Collection<ThreatObject> {
        self.db.collection(tlo.collection())
    }

    pub fn users(&self) -> Collection<User> {
        self.db.collection("users")
    }

    pub fn roles(&self) -> Collection<Role> {
        self.db.collection("roles")
    }
}

/// Escape a user-supplied substring for use inside `$regex`.
fn escape_regex(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(
            c,
            '.' | '^' | '$' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '\\'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn build_filter(tlo: TloType, filter: &ListFilter, predicate: &SourcePredicate) -> Document {
    let mut clauses: Vec<Document> = Vec::new();

    if let Some(pred) = predicate.to_document() {
        clauses.push(pred);
    }
    if let Some(status) = &filter.status {
        clauses.push(doc! { "status": status });
    }
    if let Some(campaign) = &filter.campaign {
        clauses.push(doc! { "campaign.name": campaign });
    }
    if let Some(needle) = &filter.value_contains {
        clauses.push(doc! {
            tlo.search_field(): { "$regex": escape_regex(needle), "$options": "i" }
        });
    }

    match clauses.len() {
        0 => doc! {},
        1 => clauses.pop().unwrap_or_default(),
        _ => doc! { "$and": clauses },
    }
}

fn parse_object_id(id: &str) -> Option<ObjectId> {
    ObjectId::parse_str(id).ok()
}

#[async_trait]
impl ObjectStore for MongoDb {
    async fn fetch(&self, tlo: TloType, id: &str) -> Result<Option<ThreatObject>, AppError> {
        let Some(oid) = parse_object_id(id) else {
            return Ok(None);
        };
        Ok(self
            .tlo_collection(tlo)
            .find_one(doc! { "_id": oid }, None)
            .await?)
    }

    async fn fetch_visible(
        &self,
        tlo: TloType,
        id: &str,
        predicate: &SourcePredicate,
    ) -> Result<Option<ThreatObject>, AppError> {
        let Some(oid) = parse_object_id(id) else {
            return Ok(None);
        };
        let filter = match predicate.to_document() {
            Some(pred) => doc! { "$and": [ { "_id": oid }, pred ] },
            None => doc! { "_id": oid },
        };
        Ok(self.tlo_collection(tlo).find_one(filter, None).await?)
    }

    async fn find(
        &self,
        tlo: TloType,
        filter: &ListFilter,
        predicate: &SourcePredicate,
    ) -> Result<Vec<ThreatObject>, AppError> {
        let query = build_filter(tlo, filter, predicate);
        let options = FindOptions::builder()
            .sort(doc! { "modified": -1 })
            .skip(filter.offset)
            .limit(filter.limit)
            .build();

        let mut cursor = self.tlo_collection(tlo).find(query, options).await?;
        let mut results = Vec::new();
        while let Some(obj) = cursor.try_next().await? {
            results.push(obj);
        }
        Ok(results)
    }

    async fn count(
        &self,
        tlo: TloType,
        filter: &ListFilter,
        predicate: &SourcePredicate,
    ) -> Result<u64, AppError> {
        let query = build_filter(tlo, filter, predicate);
        Ok(self
            .tlo_collection(tlo)
            .count_documents(query, None)
            .await?)
    }

    async fn distinct(
        &self,
        tlo: TloType,
        field: &str,
        predicate: &SourcePredicate,
    ) -> Result<Vec<String>, AppError> {
        let query = predicate.to_document().unwrap_or_default();
        let values = self
            .tlo_collection(tlo)
            .distinct(field, query, None)
            .await?;
        Ok(values
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    async fn push_relationship(
        &self,
        tlo: TloType,
        id: &str,
        rel: &Relationship,
    ) -> Result<bool, AppError> {
        let Some(oid) = parse_object_id(id) else {
            return Ok(false);
        };
        let rel_doc = bson::to_bson(rel)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("relationship encode: {}", e)))?;
        let result = self
            .tlo_collection(tlo)
            .update_one(
                doc! { "_id": oid },
                doc! {
                    "$push": { "relationships": rel_doc },
                    "$set": { "modified": bson::DateTime::now() },
                },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn pull_relationship(
        &self,
        tlo: TloType,
        id: &str,
        target_type: &str,
        target_id: &str,
        label: &str,
    ) -> Result<bool, AppError> {
        let Some(oid) = parse_object_id(id) else {
            return Ok(false);
        };
        let result = self
            .tlo_collection(tlo)
            .update_one(
                doc! { "_id": oid },
                doc! {
                    "$pull": { "relationships": {
                        "type": target_type,
                        "value": target_id,
                        "relationship": label,
                    } },
                    "$set": { "modified": bson::DateTime::now() },
                },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn set_status(&self, tlo: TloType, id: &str, status: &str) -> Result<bool, AppError> {
        let Some(oid) = parse_object_id(id) else {
            return Ok(false);
        };
        let result = self
            .tlo_collection(tlo)
            .update_one(
                doc! { "_id": oid },
                doc! { "$set": { "status": status, "modified": bson::DateTime::now() } },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete(&self, tlo: TloType, id: &str) -> Result<bool, AppError> {
        let Some(oid) = parse_object_id(id) else {
            return Ok(false);
        };
        let result = self
            .tlo_collection(tlo)
            .delete_one(doc! { "_id": oid }, None)
            .await?;
        Ok(result.deleted_count > 0)
    }
}

#[async_trait]
impl PrincipalStore for MongoDb {
    async fn user_by_id(&self, id: &str) -> Result<Option<User>, AppError> {
        let Some(oid) = parse_object_id(id) else {
            return Ok(None);
        };
        Ok(self.users().find_one(doc! { "_id": oid }, None).await?)
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .users()
            .find_one(doc! { "username": username }, None)
            .await?)
    }

    async fn roles_by_names(&self, names: &[String]) -> Result<Vec<Role>, AppError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut cursor = self
            .roles()
            .find(doc! { "name": { "$in": names } }, None)
            .await?;
        let mut roles = Vec::new();
        while let Some(role) = cursor.try_next().await? {
            roles.push(role);
        }
        Ok(roles)
    }
}

/// In-memory store for tests. Object ids are arbitrary strings.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<(TloType, String), ThreatObject>>,
    users: Mutex<HashMap<String, User>>,
    roles: Mutex<HashMap<String, Role>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_object(&self, tlo: TloType, id: &str, obj: ThreatObject) {
        self.objects
            .lock()
            .expect("mutex poisoned")
            .insert((tlo, id.to_string()), obj);
    }

    pub fn insert_user(&self, user: User) {
        self.users
            .lock()
            .expect("mutex poisoned")
            .insert(user.id.to_hex(), user);
    }

    pub fn insert_role(&self, role: Role) {
        self.roles
            .lock()
            .expect("mutex poisoned")
            .insert(role.name.clone(), role);
    }

    fn matches_list_filter(&self, tlo: TloType, obj: &ThreatObject, filter: &ListFilter) -> bool {
        if let Some(status) = &filter.status {
            if obj.status.as_deref() != Some(status.as_str()) {
                return false;
            }
        }
        if let Some(campaign) = &filter.campaign {
            if !obj.campaign.iter().any(|c| &c.name == campaign) {
                return false;
            }
        }
        if let Some(needle) = &filter.value_contains {
            let haystack = obj
                .fields
                .get_str(tlo.search_field())
                .unwrap_or_default()
                .to_lowercase();
            if !haystack.contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn fetch(&self, tlo: TloType, id: &str) -> Result<Option<ThreatObject>, AppError> {
        Ok(self
            .objects
            .lock()
            .expect("mutex poisoned")
            .get(&(tlo, id.to_string()))
            .cloned())
    }

    async fn fetch_visible(
        &self,
        tlo: TloType,
        id: &str,
        predicate: &SourcePredicate,
    ) -> Result<Option<ThreatObject>, AppError> {
        Ok(self
            .objects
            .lock()
            .expect("mutex poisoned")
            .get(&(tlo, id.to_string()))
            .filter(|obj| predicate.matches(*obj))
            .cloned())
    }

    async fn find(
        &self,
        tlo: TloType,
        filter: &ListFilter,
        predicate: &SourcePredicate,
    ) -> Result<Vec<ThreatObject>, AppError> {
        let objects = self.objects.lock().expect("mutex poisoned");
        let mut matching: Vec<ThreatObject> = objects
            .iter()
            .filter(|((t, _), _)| *t == tlo)
            .map(|(_, obj)| obj)
            .filter(|obj| predicate.matches(*obj))
            .filter(|obj| self.matches_list_filter(tlo, obj, filter))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn count(
        &self,
        tlo: TloType,
        filter: &ListFilter,
        predicate: &SourcePredicate,
    ) -> Result<u64, AppError> {
        let objects = self.objects.lock().expect("mutex poisoned");
        Ok(objects
            .iter()
            .filter(|((t, _), _)| *t == tlo)
            .map(|(_, obj)| obj)
            .filter(|obj| predicate.matches(*obj))
            .filter(|obj| self.matches_list_filter(tlo, obj, filter))
            .count() as u64)
    }

    async fn distinct(
        &self,
        tlo: TloType,
        field: &str,
        predicate: &SourcePredicate,
    ) -> Result<Vec<String>, AppError> {
        let objects = self.objects.lock().expect("mutex poisoned");
        let mut values: Vec<String> = objects
            .iter()
            .filter(|((t, _), _)| *t == tlo)
            .map(|(_, obj)| obj)
            .filter(|obj| predicate.matches(*obj))
            .filter_map(|obj| obj.fields.get_str(field).ok().map(str::to_string))
            .collect();
        values.sort();
        values.dedup();
        Ok(values)
    }

    async fn push_relationship(
        &self,
        tlo: TloType,
        id: &str,
        rel: &Relationship,
    ) -> Result<bool, AppError> {
        let mut objects = self.objects.lock().expect("mutex poisoned");
        match objects.get_mut(&(tlo, id.to_string())) {
            Some(obj) => {
                obj.relationships.push(rel.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pull_relationship(
        &self,
        tlo: TloType,
        id: &str,
        target_type: &str,
        target_id: &str,
        label: &str,
    ) -> Result<bool, AppError> {
        let mut objects = self.objects.lock().expect("mutex poisoned");
        match objects.get_mut(&(tlo, id.to_string())) {
            Some(obj) => {
                obj.relationships.retain(|r| {
                    !(r.target_type == target_type && r.target_id == target_id && r.label == label)
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_status(&self, tlo: TloType, id: &str, status: &str) -> Result<bool, AppError> {
        let mut objects = self.objects.lock().expect("mutex poisoned");
        match objects.get_mut(&(tlo, id.to_string())) {
            Some(obj) => {
                obj.status = Some(status.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, tlo: TloType, id: &str) -> Result<bool, AppError> {
        Ok(self
            .objects
            .lock()
            .expect("mutex poisoned")
            .remove(&(tlo, id.to_string()))
            .is_some())
    }
}

#[async_trait]
impl PrincipalStore for MemoryStore {
    async fn user_by_id(&self, id: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .users
            .lock()
            .expect("mutex poisoned")
            .get(id)
            .cloned())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .users
            .lock()
            .expect("mutex poisoned")
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn roles_by_names(&self, names: &[String]) -> Result<Vec<Role>, AppError> {
        let roles = self.roles.lock().expect("mutex poisoned");
        Ok(names
            .iter()
            .filter_map(|name| roles.get(name).cloned())
            .collect())
    }
}
