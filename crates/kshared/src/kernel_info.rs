/*
 * kernel_info.rs
 *
 * Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
 *
 */

use serde::Deserialize;
use serde::Serialize;

/// A link the kernel offers for its help menu
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HelpLink {
    /// Link label
    pub text: String,

    /// Link target
    pub url: String,
}

/// The `language_info` block of a kernel info reply
#[serde_with::skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LanguageInfo {
    /// Language name, e.g. "python"
    pub name: String,

    /// Language version string
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub mimetype: String,

    /// Including the leading dot, e.g. ".py"
    #[serde(default)]
    pub file_extension: String,

    pub pygments_lexer: Option<String>,

    /// Either a mode name or a CodeMirror mode object
    pub codemirror_mode: Option<serde_json::Value>,

    pub nbconvert_exporter: Option<String>,
}

/// Content of a `kernel_info_reply`: what the kernel is and which protocol
/// it speaks. Fields that some kernels omit are optional or defaulted.
#[serde_with::skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct KernelInfoReply {
    /// "ok", or "error" for a failed request; not all kernels send it
    pub status: Option<String>,

    /// Jupyter messaging protocol version, e.g. "5.3"
    pub protocol_version: String,

    /// Implementation name, e.g. "ipython" or "ark"
    pub implementation: Option<String>,

    pub implementation_version: Option<String>,

    pub language_info: LanguageInfo,

    #[serde(default)]
    pub banner: String,

    /// Whether the kernel handles debug requests on the control channel
    #[serde(default)]
    pub debugger: bool,

    #[serde(default)]
    pub help_links: Vec<HelpLink>,
}

impl KernelInfoReply {
    /// A one-line description such as "python 3.12.1 (ipython 8.20.0)".
    pub fn summary(&self) -> String {
        let language = format!("{} {}", self.language_info.name, self.language_info.version);
        match (&self.implementation, &self.implementation_version) {
            (Some(name), Some(version)) => format!("{} ({} {})", language.trim_end(), name, version),
            (Some(name), None) => format!("{} ({})", language.trim_end(), name),
            _ => language.trim_end().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_ipykernel_reply() {
        let reply: KernelInfoReply = serde_json::from_value(serde_json::json!({
            "status": "ok",
            "protocol_version": "5.3",
            "implementation": "ipython",
            "implementation_version": "8.20.0",
            "language_info": {
                "name": "python",
                "version": "3.12.1",
                "mimetype": "text/x-python",
                "codemirror_mode": {"name": "ipython", "version": 3},
                "file_extension": ".py"
            },
            "banner": "Python 3.12.1"
        }))
        .unwrap();
        assert_eq!(reply.language_info.name, "python");
        assert_eq!(reply.implementation.as_deref(), Some("ipython"));
        assert!(reply.help_links.is_empty());
        assert!(!reply.debugger);
        assert_eq!(reply.summary(), "python 3.12.1 (ipython 8.20.0)");
    }

    #[test]
    fn summary_omits_missing_details() {
        let reply: KernelInfoReply = serde_json::from_value(serde_json::json!({
            "protocol_version": "5.0",
            "language_info": {"name": "R"}
        }))
        .unwrap();
        assert_eq!(reply.summary(), "R");
        assert!(reply.status.is_none());
    }
}
