//
// version.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

pub const AGENT_NAME: &str = "argus";

/// The version string reported to the Controller at registration.
pub fn agent_version() -> String {
    format!("{}/v{}", AGENT_NAME, env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_version_shape() {
        let version = agent_version();
        assert!(version.starts_with("argus/v"));
    }
}
