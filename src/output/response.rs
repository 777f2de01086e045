//! JSON result envelope written to stdout.
//!
//! `{"success": true, "data": ...}` or
//! `{"success": false, "error": {code, message, details, hints?}}`.

use std::io::{self, Write};

use deedeeploy::{Error, Result};
use serde::Serialize;
use serde_json::{json, Value};

fn envelope(result: &Result<Value>) -> Value {
    match result {
        Ok(data) => json!({ "success": true, "data": data }),
        Err(err) => {
            let mut error = json!({
                "code": err.code.as_str(),
                "message": err.message,
                "details": err.details,
            });
            if !err.hints.is_empty() {
                error["hints"] = json!(err.hints);
            }
            json!({ "success": false, "error": error })
        }
    }
}

/// Serialize a command's data and pick the process exit code.
pub fn map_cmd_result_to_json<T: Serialize>(result: Result<(T, i32)>) -> (Result<Value>, i32) {
    match result {
        Ok((data, exit_code)) => match serde_json::to_value(data) {
            Ok(value) => (Ok(value), exit_code),
            Err(e) => {
                let err = Error::internal_json(e.to_string(), Some("serialize output".to_string()));
                let exit_code = err.exit_code();
                (Err(err), exit_code)
            }
        },
        Err(err) => {
            let exit_code = err.exit_code();
            (Err(err), exit_code)
        }
    }
}

pub fn print_json_result(result: Result<Value>) -> Result<()> {
    if let Err(err) = &result {
        tracing::error!(code = err.code.as_str(), "{}", err.message);
    }

    let payload = serde_json::to_string_pretty(&envelope(&result))
        .map_err(|e| Error::internal_json(e.to_string(), Some("render envelope".to_string())))?;

    match writeln!(io::stdout().lock(), "{}", payload) {
        // Reader went away (e.g. piped into `head`); nothing left to report.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(Error::internal_io(e.to_string(), Some("write stdout".to_string()))),
        Ok(()) => Ok(()),
    }
}
