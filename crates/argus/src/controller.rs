//
// controller.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use std::time::Duration;

use url::Url;

use crate::model::Breakpoint;
use crate::model::Debuggee;
use crate::model::ListBreakpointsResponse;
use crate::model::RegisterResponse;

/// How long the blocking client waits on the hanging breakpoint list before
/// giving up locally. The server timeout is shorter; this is a safety net.
const LIST_TIMEOUT: Duration = Duration::from_secs(90);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// The Controller answered with a non-success status.
    #[error("controller returned status {0}")]
    Status(u16),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// The only contracts the Debug Controller must meet. The debuglet drives
/// this trait; `HttpController` is the production implementation and tests
/// substitute a scripted one.
pub trait Controller: Send + Sync {
    /// Exchanges the debuggee identity for a server-assigned id.
    fn register(&self, debuggee: &Debuggee) -> Result<RegisterResponse, ControllerError>;

    /// Hanging GET for the active breakpoint set. Blocks until the server
    /// responds or times out (`waitExpired` in the payload).
    fn list_breakpoints(
        &self,
        debuggee_id: &str,
    ) -> Result<ListBreakpointsResponse, ControllerError>;

    /// Reports a breakpoint's final state. Sent exactly once per breakpoint.
    fn update_breakpoint(
        &self,
        debuggee_id: &str,
        breakpoint: &Breakpoint,
    ) -> Result<(), ControllerError>;
}

/// HTTP client for the Controller service.
pub struct HttpController {
    base: Url,
    client: reqwest::blocking::Client,
    list_client: reqwest::blocking::Client,
    /// Older controller versions spell the long-poll flag in snake case.
    legacy_timeout_param: bool,
}

impl HttpController {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let mut base = Url::parse(base_url)?;
        // A trailing slash keeps Url::join from dropping the last segment
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(anyhow::Error::from)?;
        let list_client = reqwest::blocking::Client::builder()
            .timeout(LIST_TIMEOUT)
            .build()
            .map_err(anyhow::Error::from)?;

        Ok(Self {
            base,
            client,
            list_client,
            legacy_timeout_param: false,
        })
    }

    /// Switches to the `success_on_timeout` spelling some controller
    /// versions expect.
    pub fn with_legacy_timeout_param(mut self) -> Self {
        self.legacy_timeout_param = true;
        self
    }

    fn join(&self, path: &str) -> Result<Url, ControllerError> {
        self.base
            .join(path)
            .map_err(|err| ControllerError::Transport(err.into()))
    }
}

fn check_status(response: &reqwest::blocking::Response) -> Result<(), ControllerError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ControllerError::Status(status.as_u16()))
    }
}

impl Controller for HttpController {
    fn register(&self, debuggee: &Debuggee) -> Result<RegisterResponse, ControllerError> {
        let url = self.join("debuggees/register")?;
        log::debug!("Registering debuggee with {url}");

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "debuggee": debuggee }))
            .send()
            .map_err(|err| ControllerError::Transport(err.into()))?;

        check_status(&response)?;
        response
            .json::<RegisterResponse>()
            .map_err(|err| ControllerError::Transport(err.into()))
    }

    fn list_breakpoints(
        &self,
        debuggee_id: &str,
    ) -> Result<ListBreakpointsResponse, ControllerError> {
        let mut url = self.join(&format!("debuggees/{debuggee_id}/breakpoints"))?;

        let param = if self.legacy_timeout_param {
            "success_on_timeout"
        } else {
            "successOnTimeout"
        };
        url.query_pairs_mut().append_pair(param, "true");

        let response = self
            .list_client
            .get(url)
            .send()
            .map_err(|err| ControllerError::Transport(err.into()))?;

        check_status(&response)?;

        // A missing or malformed payload means "no breakpoints", never an
        // error; the poll loop just goes around again.
        match response.json::<ListBreakpointsResponse>() {
            Ok(list) => Ok(list),
            Err(err) => {
                log::debug!("Unparseable breakpoint list treated as empty: {err}");
                Ok(ListBreakpointsResponse::default())
            },
        }
    }

    fn update_breakpoint(
        &self,
        debuggee_id: &str,
        breakpoint: &Breakpoint,
    ) -> Result<(), ControllerError> {
        let url = self.join(&format!(
            "debuggees/{debuggee_id}/breakpoints/{}",
            breakpoint.id
        ))?;

        let body = serde_json::json!({
            "debuggeeId": debuggee_id,
            "breakpoint": breakpoint,
        });

        let response = self
            .client
            .put(url)
            .json(&body)
            .send()
            .map_err(|err| ControllerError::Transport(err.into()))?;

        check_status(&response)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_join_preserves_controller_path() {
        let controller =
            HttpController::new("https://clouddebugger.googleapis.com/v2/controller").unwrap();
        let url = controller.join("debuggees/register").unwrap();
        assert_eq!(
            url.as_str(),
            "https://clouddebugger.googleapis.com/v2/controller/debuggees/register"
        );
    }

    #[test]
    fn test_list_url_carries_timeout_param() {
        let controller = HttpController::new("http://localhost:9101/v2/controller").unwrap();
        let mut url = controller.join("debuggees/d-1/breakpoints").unwrap();
        url.query_pairs_mut().append_pair("successOnTimeout", "true");
        assert!(url.as_str().contains("successOnTimeout=true"));

        let legacy = HttpController::new("http://localhost:9101/v2/controller")
            .unwrap()
            .with_legacy_timeout_param();
        assert!(legacy.legacy_timeout_param);
    }
}
