//! # StackOverflow Mapping
//!
//! Maps rows of the StackOverflow questions, answers and tags tables onto
//! `User`, `Question` and `Answer` vertices.
//!
//! | record kind | vertices                      | edges                      |
//! |-------------|-------------------------------|----------------------------|
//! | `question`  | user, question (updated)      | `uq` UserPostsQuestion     |
//! | `answer`    | user, answer (updated), question placeholder | `ua` UserPostsAnswer, `aq` AnswerIsForQuestion |
//! | `tags`      | question (tag list updated)   |                            |
//!
//! Users are created once and never updated.

use crate::client::GraphClient;
use crate::key::TrackingKey;
use crate::primitives::{ELEMENT_CREATED_AT, ELEMENT_LABEL, ELEMENT_UPDATED_AT};
use crate::record::SourceRecord;
use crate::schema::{ElementSchema, GraphModel};
use crate::tracker::TrackerStore;
use crate::types::{GraftError, PropertyMap, PropertyType, PropertyValue};
use crate::upsert::{RecordMapper, Upserter};

pub const USER: &str = "User";
pub const QUESTION: &str = "Question";
pub const ANSWER: &str = "Answer";

pub const USER_POSTS_QUESTION: &str = "UserPostsQuestion";
pub const USER_POSTS_ANSWER: &str = "UserPostsAnswer";
pub const ANSWER_IS_FOR_QUESTION: &str = "AnswerIsForQuestion";

const SOURCE_ID: &str = "SourceId";

const BOOKKEEPING: [(&str, PropertyType); 3] = [
    (ELEMENT_LABEL, PropertyType::Text),
    (ELEMENT_CREATED_AT, PropertyType::Timestamp),
    (ELEMENT_UPDATED_AT, PropertyType::Timestamp),
];

/// The StackOverflow record mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackOverflow;

impl StackOverflow {
    fn user<C: GraphClient, T: TrackerStore>(
        up: &mut Upserter<C, T>,
        record: &SourceRecord,
    ) -> Result<TrackingKey, GraftError> {
        let owner = record.identifier("OwnerUserId")?;
        let key = TrackingKey::vertex("user", &owner)?;
        let mut properties = PropertyMap::from([(SOURCE_ID.to_string(), PropertyValue::from(owner))]);
        if let Some(name) = record.get("OwnerDisplayName") {
            properties.insert("UserName".to_string(), PropertyValue::from(name.to_string()));
        }
        up.upsert_vertex(USER, &key, properties, None)?;
        Ok(key)
    }

    fn question<C: GraphClient, T: TrackerStore>(
        up: &mut Upserter<C, T>,
        record: &SourceRecord,
    ) -> Result<(), GraftError> {
        let user = Self::user(up, record)?;

        let id = record.identifier("Id")?;
        let key = TrackingKey::vertex("question", &id)?;
        let mut update = PropertyMap::from([
            (
                "SourceCreationDateTime".to_string(),
                PropertyValue::from(record.timestamp("CreationDate")?),
            ),
            ("PostScore".to_string(), PropertyValue::from(record.int("Score")?)),
            ("QuestionTitle".to_string(), PropertyValue::from(record.text("Title")?)),
            ("PostBody".to_string(), PropertyValue::from(record.text("Body")?)),
        ]);
        let closed = match record.timestamp_opt("ClosedDate")? {
            Some(ts) => Some(ts),
            None => record.timestamp_opt("CloseDate")?,
        };
        if let Some(ts) = closed {
            update.insert("SourceCloseDateTime".to_string(), PropertyValue::from(ts));
        }
        let mut create = update.clone();
        create.insert(SOURCE_ID.to_string(), PropertyValue::from(id));

        up.upsert_vertex(QUESTION, &key, create, Some(update))?;
        up.stage_edge("uq", &user, &key, USER_POSTS_QUESTION, PropertyMap::new())?;
        Ok(())
    }

    fn answer<C: GraphClient, T: TrackerStore>(
        up: &mut Upserter<C, T>,
        record: &SourceRecord,
    ) -> Result<(), GraftError> {
        let user = Self::user(up, record)?;

        let id = record.identifier("Id")?;
        let key = TrackingKey::vertex("answer", &id)?;
        let update = PropertyMap::from([
            (
                "SourceCreationDateTime".to_string(),
                PropertyValue::from(record.timestamp("CreationDate")?),
            ),
            ("PostScore".to_string(), PropertyValue::from(record.int("Score")?)),
            ("PostBody".to_string(), PropertyValue::from(record.text("Body")?)),
        ]);
        let mut create = update.clone();
        create.insert(SOURCE_ID.to_string(), PropertyValue::from(id));
        up.upsert_vertex(ANSWER, &key, create, Some(update))?;

        let parent = record.identifier("ParentId")?;
        let question = TrackingKey::vertex("question", &parent)?;
        let placeholder = PropertyMap::from([(SOURCE_ID.to_string(), PropertyValue::from(parent))]);
        up.reference_vertex(QUESTION, &question, placeholder)?;

        up.stage_edge("ua", &user, &key, USER_POSTS_ANSWER, PropertyMap::new())?;
        up.stage_edge("aq", &key, &question, ANSWER_IS_FOR_QUESTION, PropertyMap::new())?;
        Ok(())
    }

    fn tags<C: GraphClient, T: TrackerStore>(
        up: &mut Upserter<C, T>,
        record: &SourceRecord,
    ) -> Result<(), GraftError> {
        let id = record.identifier("Id")?;
        let key = TrackingKey::vertex("question", &id)?;
        let update = PropertyMap::from([(
            "PostTagList".to_string(),
            PropertyValue::from(record.text("PostTagList")?),
        )]);
        let mut create = update.clone();
        create.insert(SOURCE_ID.to_string(), PropertyValue::from(id));
        up.upsert_vertex(QUESTION, &key, create, Some(update))?;
        Ok(())
    }
}

impl RecordMapper for StackOverflow {
    fn graph_model(&self) -> Result<GraphModel, GraftError> {
        let user = ElementSchema::new(
            USER,
            [(SOURCE_ID, PropertyType::Text), ("UserName", PropertyType::Text)],
        )?
        .extended(BOOKKEEPING)?;

        let question = ElementSchema::new(
            QUESTION,
            [
                (SOURCE_ID, PropertyType::Text),
                ("SourceCreationDateTime", PropertyType::Timestamp),
                ("SourceCloseDateTime", PropertyType::Timestamp),
                ("PostScore", PropertyType::Int),
                ("QuestionTitle", PropertyType::Text),
                ("PostBody", PropertyType::Text),
                ("PostTagList", PropertyType::Text),
            ],
        )?
        .extended(BOOKKEEPING)?;

        let answer = ElementSchema::new(
            ANSWER,
            [
                (SOURCE_ID, PropertyType::Text),
                ("SourceCreationDateTime", PropertyType::Timestamp),
                ("PostScore", PropertyType::Int),
                ("PostBody", PropertyType::Text),
            ],
        )?
        .extended(BOOKKEEPING)?;

        let edge = ElementSchema::new("Edge", BOOKKEEPING)?;

        Ok(GraphModel::new(edge)
            .with_vertex(user)
            .with_vertex(question)
            .with_vertex(answer))
    }

    fn ingest<C: GraphClient, T: TrackerStore>(
        &self,
        upserter: &mut Upserter<C, T>,
        record: &SourceRecord,
    ) -> Result<(), GraftError> {
        match record.kind() {
            "question" | "questions" => Self::question(upserter, record),
            "answer" | "answers" => Self::answer(upserter, record),
            "tags" => Self::tags(upserter, record),
            other => Err(GraftError::UnknownRecordKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryGraph;
    use crate::tracker::IdentityTracker;
    use crate::upsert::{Action, UpsertOptions};

    fn upserter() -> Upserter<MemoryGraph, IdentityTracker> {
        Upserter::new(
            MemoryGraph::new(),
            IdentityTracker::with_default_schemas().expect("tracker"),
            StackOverflow.graph_model().expect("model"),
            None,
            UpsertOptions::default(),
        )
        .expect("upserter")
    }

    fn key(prefix: &str, id: &str) -> TrackingKey {
        TrackingKey::vertex(prefix, id).expect("key")
    }

    fn answer(id: &str, parent: &str, owner: &str) -> SourceRecord {
        SourceRecord::new("answer")
            .with("Id", id)
            .with("ParentId", parent)
            .with("OwnerUserId", owner)
            .with("CreationDate", "2008-08-02T08:00:00Z")
            .with("Score", 1_i64)
            .with("Body", "try this")
    }

    #[test]
    fn answer_before_question_creates_placeholder() {
        let mut up = upserter();
        let outcome = up.ingest(&StackOverflow, &answer("A1", "Q1", "U2"), 0).expect("answer");

        assert!(outcome.actions.contains(&Action::CreatedVertex(key("question", "Q1"))));
        let id = up
            .tracker()
            .vertex_engine_id(&key("question", "Q1"))
            .expect("id")
            .expect("placeholder tracked");
        let placeholder = up.client().vertex(&id).expect("vertex");
        assert!(!placeholder.properties.contains_key("QuestionTitle"));
        assert_eq!(up.client().edge_count(), 2);
    }

    #[test]
    fn repeated_answer_is_updated_not_duplicated() {
        let mut up = upserter();
        up.ingest(&StackOverflow, &answer("A1", "Q1", "U2"), 0).expect("first");
        let second = up.ingest(&StackOverflow, &answer("A1", "Q1", "U2"), 1).expect("second");

        assert!(second.actions.contains(&Action::UpdatedVertex(key("answer", "A1"))));
        assert_eq!(up.client().vertices_labelled(ANSWER).count(), 1);
        assert_eq!(up.client().edge_count(), 2);
    }

    #[test]
    fn tags_fill_in_tracked_question() {
        let mut up = upserter();
        up.ingest(&StackOverflow, &answer("A1", "Q1", "U2"), 0).expect("answer");
        let tags = SourceRecord::new("tags")
            .with("Id", "Q1")
            .with("PostTagList", "<rust><graph>");
        let outcome = up.ingest(&StackOverflow, &tags, 1).expect("tags");

        assert_eq!(outcome.actions, vec![Action::UpdatedVertex(key("question", "Q1"))]);
        let id = up
            .tracker()
            .vertex_engine_id(&key("question", "Q1"))
            .expect("id")
            .expect("tracked");
        assert_eq!(
            up.client().vertex(&id).expect("vertex").properties.get("PostTagList"),
            Some(&PropertyValue::from("<rust><graph>"))
        );
        assert_eq!(up.client().vertices_labelled(QUESTION).count(), 1);
    }

    #[test]
    fn close_date_alias_and_absence() {
        let mut up = upserter();
        let record = SourceRecord::new("question")
            .with("Id", "Q7")
            .with("OwnerUserId", "U1")
            .with("CreationDate", "2008-08-01")
            .with("CloseDate", "2008-09-01")
            .with("Score", 0_i64)
            .with("Title", "t")
            .with("Body", "b");
        up.ingest(&StackOverflow, &record, 0).expect("question");

        let id = up
            .tracker()
            .vertex_engine_id(&key("question", "Q7"))
            .expect("id")
            .expect("tracked");
        assert!(up.client().vertex(&id).expect("vertex").properties.contains_key("SourceCloseDateTime"));
    }

    #[test]
    fn missing_owner_fails_before_any_write() {
        let mut up = upserter();
        let record = SourceRecord::new("question").with("Id", "Q1");
        let failure = up.ingest(&StackOverflow, &record, 0).expect_err("missing");
        assert!(matches!(failure.source, GraftError::MissingField(ref f) if f == "OwnerUserId"));
        assert_eq!(up.client().call_count(), 0);
    }
}
