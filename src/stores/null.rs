//! A backend that does nothing. It can be used to measure the overhead of
//! the workload engine itself.
//!
//! ## Configuration Format
//!
//! ```toml
//! [store]
//! name = "null"
//! ```

use crate::stores::Registry;
use crate::{Backend, BackendHandle, FieldValue, GroupRow, Record, Reducer, Status};
use std::sync::Arc;

#[derive(Clone)]
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }

    pub fn new_backend(_opt: &toml::Table) -> Arc<dyn Backend> {
        Arc::new(Self::new())
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for NullBackend {
    fn handle(&self) -> Box<dyn BackendHandle> {
        Box::new(self.clone())
    }
}

impl BackendHandle for NullBackend {
    fn insert(&mut self, _table: &str, _key: &str, _record: Record) -> Status {
        Status::OK
    }

    fn read(&mut self, _table: &str, _key: &str, _fields: Option<&[String]>) -> (Status, Record) {
        (Status::OK, Record::new())
    }

    fn read_by(
        &mut self,
        _table: &str,
        _field: &str,
        _value: &FieldValue,
        _fields: Option<&[String]>,
    ) -> (Status, Record) {
        (Status::OK, Record::new())
    }

    fn read_range(
        &mut self,
        _table: &str,
        _eq_field: &str,
        _eq_value: &FieldValue,
        _range_field: &str,
        _lower: &FieldValue,
        _upper: &FieldValue,
        _fields: Option<&[String]>,
    ) -> (Status, Record) {
        (Status::OK, Record::new())
    }

    fn update(&mut self, _table: &str, _key: &str, _record: Record) -> Status {
        Status::OK
    }

    fn scan(
        &mut self,
        _table: &str,
        _start_key: &str,
        _count: usize,
        _fields: Option<&[String]>,
    ) -> (Status, Vec<Record>) {
        (Status::OK, Vec::new())
    }

    fn scan_by(
        &mut self,
        _table: &str,
        _field: &str,
        _start: &FieldValue,
        _count: usize,
        _fields: Option<&[String]>,
    ) -> (Status, Vec<Record>) {
        (Status::OK, Vec::new())
    }

    fn scan_range(
        &mut self,
        _table: &str,
        _eq_field: &str,
        _eq_value: &FieldValue,
        _range_field: &str,
        _lower: &FieldValue,
        _upper: &FieldValue,
        _count: usize,
        _fields: Option<&[String]>,
    ) -> (Status, Vec<Record>) {
        (Status::OK, Vec::new())
    }

    fn group(&mut self, _table: &str, _group_field: &str, _limit: usize) -> (Status, Vec<GroupRow>) {
        (Status::OK, Vec::new())
    }

    fn group_filtered(
        &mut self,
        _table: &str,
        _match_field: &str,
        _lower: &FieldValue,
        _upper: &FieldValue,
        _limit: usize,
        _group_field: &str,
        _reducer: Reducer,
        _top_n: usize,
    ) -> (Status, Vec<GroupRow>) {
        (Status::OK, Vec::new())
    }
}

inventory::submit! {
    Registry::new("null", NullBackend::new_backend)
}
