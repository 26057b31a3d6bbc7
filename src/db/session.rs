//! The seam between the pooling/caching core and the database driver.
//!
//! The pool, executor and schema cache only speak these traits. The Postgres
//! implementation lives in [`super::postgres`]; tests use the in-memory double
//! in [`mock`].

use crate::db::executor::ResultBuilder;
use crate::error::DbResult;
use crate::models::{ColumnDescriptor, QueryParam};
use std::future::Future;
use std::time::Duration;

/// One live database session, exclusively owned by whoever holds it.
pub trait Session: Send + 'static {
    /// Run one statement and stream its rows into `sink`.
    ///
    /// Stops reading as soon as the sink reports a cap was hit. `timeout` is the
    /// statement timeout the server should enforce for this call. Nothing the
    /// statement changes on the session may outlive the call.
    fn fetch(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        timeout: Duration,
        sink: &mut ResultBuilder,
    ) -> impl Future<Output = DbResult<()>> + Send;

    /// Table names in `schema`, in catalog order.
    fn list_tables(&mut self, schema: &str) -> impl Future<Output = DbResult<Vec<String>>> + Send;

    /// Columns of `schema.table`, in ordinal order.
    fn list_columns(
        &mut self,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = DbResult<Vec<ColumnDescriptor>>> + Send;

    /// Server process serving this session, used to cancel its running statement.
    fn backend_pid(&self) -> Option<i32> {
        None
    }

    /// Close the session gracefully.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Opens new sessions. One connector per pool.
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    fn connect(&self) -> impl Future<Output = DbResult<Self::Session>> + Send;

    /// Cancel the statement running on `backend_pid`, out of band.
    fn cancel(&self, backend_pid: i32) -> impl Future<Output = DbResult<()>> + Send {
        let _ = backend_pid;
        async { Ok(()) }
    }
}
