//! In-process store with the same uniqueness and reference rules as the
//! `PostgreSQL` schema. Used for local runs without a database and in tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use super::{
    Category, ForumStore, NewTopic, NewUser, Page, PageRequest, SessionStore, Store, StoreError,
    Topic, UserRecord, UserStore, UserUpdate,
};
use crate::api::auth::{identity::CurrentUser, token::unix_now};

#[derive(Debug)]
struct SessionRow {
    user_id: i64,
    expires_at: i64,
}

#[derive(Debug)]
struct TopicRow {
    name: String,
    description: String,
    image: Option<Vec<u8>>,
    category_id: i64,
}

#[derive(Debug, Default)]
struct Inner {
    next_user_id: i64,
    users: BTreeMap<i64, UserRecord>,
    sessions: HashMap<Vec<u8>, SessionRow>,
    next_category_id: i64,
    categories: BTreeMap<i64, Category>,
    next_topic_id: i64,
    topics: BTreeMap<i64, TopicRow>,
}

impl Inner {
    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|record| record.user.email == email && Some(record.user.id) != except)
    }

    fn username_taken(&self, username: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|record| record.user.username == username && Some(record.user.id) != except)
    }

    fn topic(&self, id: i64, row: &TopicRow) -> Topic {
        Topic {
            id,
            name: row.name.clone(),
            description: row.description.clone(),
            image: row.image.clone(),
            category_id: row.category_id,
            category_name: self
                .categories
                .get(&row.category_id)
                .map(|category| category.name.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live session rows, for assertions about revocation.
    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

fn page_of<T: Clone>(items: &[T], request: PageRequest) -> Page<T> {
    let offset = usize::try_from(request.offset()).unwrap_or(usize::MAX);
    let per_page = usize::try_from(request.per_page).unwrap_or(usize::MAX);
    let slice = items.iter().skip(offset).take(per_page).cloned().collect();
    Page::new(slice, request, items.len() as u64)
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> Result<CurrentUser, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.email_taken(&user.email, None) {
            return Err(StoreError::DuplicateEmail);
        }
        if inner.username_taken(&user.username, None) {
            return Err(StoreError::DuplicateUsername);
        }
        inner.next_user_id += 1;
        let created = CurrentUser {
            id: inner.next_user_id,
            email: user.email,
            username: user.username,
            name: user.name,
            confirmed: false,
            role: user.role,
            member_since_unix: unix_now(),
        };
        inner.users.insert(
            created.id,
            UserRecord {
                user: created.clone(),
                password_hash: user.password_hash,
            },
        );
        Ok(created)
    }

    async fn find_user_by_id(&self, id: i64) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .users
            .values()
            .find(|record| record.user.email == email)
            .cloned())
    }

    async fn set_confirmed(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        record.user.confirmed = true;
        Ok(())
    }

    async fn update_email(&self, id: i64, email: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.email_taken(email, Some(id)) {
            return Err(StoreError::DuplicateEmail);
        }
        let record = inner.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        record.user.email = email.to_string();
        Ok(())
    }

    async fn update_password_hash(&self, id: i64, password_hash: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        record.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<CurrentUser, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.users.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        if inner.email_taken(&update.email, Some(id)) {
            return Err(StoreError::DuplicateEmail);
        }
        if inner.username_taken(&update.username, Some(id)) {
            return Err(StoreError::DuplicateUsername);
        }
        let record = inner.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        record.user.email = update.email;
        record.user.username = update.username;
        record.user.name = update.name;
        record.user.confirmed = update.confirmed;
        record.user.role = update.role;
        Ok(record.user.clone())
    }

    async fn list_users_except(&self, id: i64) -> Result<Vec<CurrentUser>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .users
            .values()
            .filter(|record| record.user.id != id)
            .map(|record| record.user.clone())
            .collect())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(
        &self,
        token_hash: &[u8],
        user_id: i64,
        ttl_seconds: i64,
        _remember: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.users.contains_key(&user_id) {
            return Err(StoreError::Referenced);
        }
        let now = unix_now();
        inner.sessions.retain(|_, session| session.expires_at > now);
        inner.sessions.insert(
            token_hash.to_vec(),
            SessionRow {
                user_id,
                expires_at: now.saturating_add(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn lookup_session(&self, token_hash: &[u8]) -> Result<Option<CurrentUser>, StoreError> {
        let inner = self.inner.lock().await;
        let Some(session) = inner.sessions.get(token_hash) else {
            return Ok(None);
        };
        if session.expires_at <= unix_now() {
            return Ok(None);
        }
        Ok(inner
            .users
            .get(&session.user_id)
            .map(|record| record.user.clone()))
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<(), StoreError> {
        self.inner.lock().await.sessions.remove(token_hash);
        Ok(())
    }

    async fn delete_user_sessions(&self, user_id: i64) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, session| session.user_id != user_id);
        Ok((before - inner.sessions.len()) as u64)
    }
}

#[async_trait]
impl ForumStore for MemoryStore {
    async fn insert_category(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Category, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.categories.values().any(|category| category.name == name) {
            return Err(StoreError::DuplicateName);
        }
        inner.next_category_id += 1;
        let category = Category {
            id: inner.next_category_id,
            name: name.to_string(),
            description: description.to_string(),
        };
        inner.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn list_categories(&self, page: PageRequest) -> Result<Page<Category>, StoreError> {
        let inner = self.inner.lock().await;
        let all: Vec<Category> = inner.categories.values().cloned().collect();
        Ok(page_of(&all, page))
    }

    async fn all_categories(&self) -> Result<Vec<Category>, StoreError> {
        let inner = self.inner.lock().await;
        let mut all: Vec<Category> = inner.categories.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn delete_category(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.categories.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        if inner.topics.values().any(|topic| topic.category_id == id) {
            return Err(StoreError::Referenced);
        }
        inner.categories.remove(&id);
        Ok(())
    }

    async fn insert_topic(&self, topic: NewTopic) -> Result<Topic, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.topics.values().any(|row| row.name == topic.name) {
            return Err(StoreError::DuplicateName);
        }
        if !inner.categories.contains_key(&topic.category_id) {
            return Err(StoreError::Referenced);
        }
        inner.next_topic_id += 1;
        let id = inner.next_topic_id;
        let row = TopicRow {
            name: topic.name,
            description: topic.description,
            image: topic.image,
            category_id: topic.category_id,
        };
        let created = inner.topic(id, &row);
        inner.topics.insert(id, row);
        Ok(created)
    }

    async fn list_topics(&self, page: PageRequest) -> Result<Page<Topic>, StoreError> {
        let inner = self.inner.lock().await;
        let all: Vec<Topic> = inner
            .topics
            .iter()
            .map(|(id, row)| inner.topic(*id, row))
            .collect();
        Ok(page_of(&all, page))
    }

    async fn delete_topic(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .topics
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
