//! crates/reading_log_core/src/unlink.rs
//!
//! A parent removing their own link to a student.
//!
//! Both sides of the parent/student relation and the audit entry are written
//! inside one `LinkTransaction`. Any early return drops the transaction, which
//! discards whatever was staged.

use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::{AuditKind, AuditLogEntry, Caller};
use crate::error::{ServiceError, ServiceResult, StepError};
use crate::ports::{Clock, DatabaseService, LinkTransaction, PortError};

const UNLINK_FAILED: &str = "An error occurred while unlinking from the student.";
pub const UNLINK_SUCCESS: &str = "Successfully unlinked from student.";

pub struct UnlinkService {
    db: Arc<dyn DatabaseService>,
    clock: Arc<dyn Clock>,
}

impl UnlinkService {
    pub fn new(db: Arc<dyn DatabaseService>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Unlinks the calling parent from `student_id`. Returns the success message.
    pub async fn unlink(&self, caller: Caller, school_id: Uuid, student_id: Uuid) -> ServiceResult<String> {
        let parent_id = caller.user_id;
        match self.unlink_in_transaction(parent_id, school_id, student_id).await {
            Ok(()) => {
                info!(
                    parent_user_id = %parent_id,
                    student_id = %student_id,
                    school_id = %school_id,
                    "Parent successfully unlinked from student"
                );
                Ok(UNLINK_SUCCESS.to_string())
            }
            Err(StepError::Rejected(e)) => Err(e),
            Err(StepError::Store(e)) => {
                error!(
                    parent_user_id = %parent_id,
                    student_id = %student_id,
                    school_id = %school_id,
                    error = %e,
                    "Error unlinking parent from student"
                );
                Err(ServiceError::Internal(UNLINK_FAILED.to_string()))
            }
        }
    }

    async fn unlink_in_transaction(
        &self,
        parent_id: Uuid,
        school_id: Uuid,
        student_id: Uuid,
    ) -> Result<(), StepError> {
        let mut tx = self.db.begin_link_transaction().await?;
        Self::stage_unlink(tx.as_mut(), parent_id, school_id, student_id).await?;

        let mut entry = AuditLogEntry::new(AuditKind::ParentSelfUnlink, self.clock.now());
        entry.parent_user_id = Some(parent_id);
        entry.student_id = Some(student_id);
        entry.school_id = Some(school_id);
        tx.append_audit(entry).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn stage_unlink(
        tx: &mut dyn LinkTransaction,
        parent_id: Uuid,
        school_id: Uuid,
        student_id: Uuid,
    ) -> Result<(), StepError> {
        let parent = match tx.get_parent(school_id, parent_id).await {
            Ok(parent) => parent,
            Err(PortError::NotFound(_)) => {
                return Err(ServiceError::NotFound("Parent account not found.".to_string()).into())
            }
            Err(e) => return Err(e.into()),
        };
        if !parent.linked_children.contains(&student_id) {
            return Err(ServiceError::Precondition("You are not linked to this student.".to_string()).into());
        }

        let student = match tx.get_student(school_id, student_id).await {
            Ok(student) => student,
            Err(PortError::NotFound(_)) => {
                return Err(ServiceError::NotFound("Student not found.".to_string()).into())
            }
            Err(e) => return Err(e.into()),
        };

        let parent_ids = student
            .parent_ids
            .into_iter()
            .filter(|id| *id != parent_id)
            .collect();
        let linked_children = parent
            .linked_children
            .into_iter()
            .filter(|id| *id != student_id)
            .collect();

        tx.set_parent_ids(school_id, student_id, parent_ids).await?;
        tx.set_linked_children(school_id, parent_id, linked_children).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Parent, Student, StudentStats};
    use crate::memory::InMemoryStore;
    use crate::ports::SystemClock;

    #[tokio::test]
    async fn missing_parent_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let service = UnlinkService::new(store.clone(), Arc::new(SystemClock));
        let caller = Caller {
            user_id: Uuid::new_v4(),
        };
        let err = service
            .unlink(caller, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound("Parent account not found.".into()));
        assert!(store.audit_entries().await.is_empty());
    }

    #[tokio::test]
    async fn linked_parent_with_missing_student_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let school_id = Uuid::new_v4();
        let parent_id = Uuid::new_v4();
        let ghost = Uuid::new_v4();
        store
            .insert_parent(Parent {
                id: parent_id,
                school_id,
                linked_children: vec![ghost],
                push_token: None,
            })
            .await;

        let service = UnlinkService::new(store.clone(), Arc::new(SystemClock));
        let err = service
            .unlink(Caller { user_id: parent_id }, school_id, ghost)
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound("Student not found.".into()));
        assert_eq!(
            store.parent(school_id, parent_id).await.unwrap().linked_children,
            vec![ghost]
        );
    }

    #[tokio::test]
    async fn other_links_survive() {
        let store = Arc::new(InMemoryStore::new());
        let school_id = Uuid::new_v4();
        let parent_id = Uuid::new_v4();
        let other_parent = Uuid::new_v4();
        let student = Student {
            id: Uuid::new_v4(),
            school_id,
            first_name: "Mia".into(),
            last_name: "Ortiz".into(),
            class_id: None,
            parent_ids: Vec::new(),
            stats: StudentStats::default(),
            achievements: Vec::new(),
        };
        let sibling = Uuid::new_v4();
        store.insert_student(student.clone()).await;
        for id in [parent_id, other_parent] {
            store
                .insert_parent(Parent {
                    id,
                    school_id,
                    linked_children: Vec::new(),
                    push_token: None,
                })
                .await;
            store.link(school_id, id, student.id).await;
        }
        store.link(school_id, parent_id, sibling).await;

        let service = UnlinkService::new(store.clone(), Arc::new(SystemClock));
        let message = service
            .unlink(Caller { user_id: parent_id }, school_id, student.id)
            .await
            .unwrap();
        assert_eq!(message, UNLINK_SUCCESS);

        let parent = store.parent(school_id, parent_id).await.unwrap();
        assert_eq!(parent.linked_children, vec![sibling]);
        let student = store.student(school_id, student.id).await.unwrap();
        assert_eq!(student.parent_ids, vec![other_parent]);
    }
}
