//! Backend contract the list controller consumes.
//!
//! Mutations only report success or failure; the controller never edits
//! tasks in place and instead re-fetches the page after a change.

use thiserror::Error;
use workorder_shared::{
    InterfaceSettings, PaginatedResponse, PlannedDateUpdate, TaskAssignRequest, TaskCreate,
    TaskDto, TaskPatch, TaskStatusUpdate, TasksListArgs,
};

use crate::task::Task;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Server-side rejections of a specific item (4xx) will fail again on
    /// retry; everything else might not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => *status >= 500,
            ApiError::Decode(_) => false,
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait TaskBackend {
    async fn list_tasks(
        &self,
        args: &TasksListArgs,
    ) -> Result<PaginatedResponse<TaskDto>, ApiError>;

    async fn update_status(&self, id: i64, body: &TaskStatusUpdate) -> Result<(), ApiError>;

    async fn assign_task(&self, id: i64, body: &TaskAssignRequest) -> Result<(), ApiError>;

    async fn update_planned_date(
        &self,
        id: i64,
        body: &PlannedDateUpdate,
    ) -> Result<(), ApiError>;

    async fn patch_task(&self, id: i64, patch: &TaskPatch) -> Result<(), ApiError>;

    async fn delete_task(&self, id: i64) -> Result<(), ApiError>;

    async fn create_task(&self, body: &TaskCreate) -> Result<(), ApiError>;

    async fn interface_settings(&self) -> Result<InterfaceSettings, ApiError>;
}

/// One page of normalized tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPage {
    pub items: Vec<Task>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
    pub pages: u32,
}

impl TaskPage {
    pub fn from_response(response: PaginatedResponse<TaskDto>) -> Result<Self, ApiError> {
        let items = response
            .items
            .into_iter()
            .map(Task::from_dto)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            items,
            total: response.total,
            page: response.page,
            size: response.size,
            pages: response.pages,
        })
    }
}
