//! Conversion between live flows and their wire representation

use chrono::{DateTime, Utc};
use intercept_common::{body_to_wire, FlowId, FlowSnapshot, Modification};

use crate::error::FlowError;
use crate::flow::FlowHandle;
use tracing::warn;

/// Copy a live flow into a transferable snapshot.
///
/// Never fails: an empty body becomes an empty string and bytes that are not
/// UTF-8 are carried losslessly in `body_base64`.
pub fn snapshot(id: FlowId, flow: &dyn FlowHandle, timestamp: DateTime<Utc>) -> FlowSnapshot {
    let (body, body_base64) = body_to_wire(flow.body());
    FlowSnapshot {
        id,
        method: flow.method(),
        url: flow.url(),
        host: flow.host(),
        path: flow.path(),
        scheme: flow.scheme(),
        port: flow.port(),
        headers: flow.headers().into_iter().collect(),
        body,
        body_base64,
        timestamp,
        response: None,
    }
}

/// Write every present field of `modification` onto the flow.
///
/// All or nothing: when any field is rejected the flow keeps its previous
/// method, path, headers and body.
pub fn apply(modification: &Modification, flow: &mut dyn FlowHandle) -> Result<(), FlowError> {
    modification.validate()?;
    let body = modification.body_bytes()?;

    let original_method = flow.method();
    let original_path = flow.path();

    let written = write_fields(modification, flow);
    if written.is_err() {
        rollback(flow, &original_method, &original_path);
        return written;
    }

    if let Some(body) = body {
        flow.set_body(body);
    }
    Ok(())
}

/// Put back the method and path a failed write may have changed. Returns
/// false when the handle refused one of its own previous values.
fn rollback(flow: &mut dyn FlowHandle, method: &str, path: &str) -> bool {
    let mut restored = true;
    if let Err(e) = flow.set_method(method) {
        warn!(method, error = %e, "Could not restore method after rejected modification");
        restored = false;
    }
    if let Err(e) = flow.set_path(path) {
        warn!(path, error = %e, "Could not restore path after rejected modification");
        restored = false;
    }
    restored
}

fn write_fields(modification: &Modification, flow: &mut dyn FlowHandle) -> Result<(), FlowError> {
    if let Some(method) = &modification.method {
        flow.set_method(method)?;
    }
    if let Some(path) = &modification.path {
        flow.set_path(path)?;
    }
    if let Some(headers) = &modification.headers {
        flow.set_headers(headers)?;
    }
    Ok(())
}
