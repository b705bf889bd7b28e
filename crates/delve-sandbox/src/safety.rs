/// Rejection produced by the safety screen, naming the offending pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyViolation {
    pub pattern: String,
    pub reason: String,
}

impl std::fmt::Display for SafetyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unsafe pattern `{}`: {}", self.pattern, self.reason)
    }
}

impl std::error::Error for SafetyViolation {}

/// Pattern-based denylist screen applied before any backend sees the code.
/// This is substring matching, not semantic analysis; the process/session
/// boundary of the execution backend is the actual isolation layer.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    denylist: Vec<&'static str>,
    write_tokens: Vec<&'static str>,
    safe_sinks: Vec<&'static str>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            denylist: vec![
                // dynamic evaluation
                "eval(",
                "exec(",
                "__import__",
                "compile(",
                // reflection / introspection
                "globals(",
                "locals(",
                "getattr(",
                "setattr(",
                "delattr(",
                // process and OS control
                "os.system",
                "subprocess",
                "popen",
                "os.spawn",
                // interpreter exit
                "sys.exit",
                "exit(",
                "quit(",
                // raw filesystem removal
                "os.remove",
                "os.unlink",
                "os.rmdir",
                "shutil",
                // networking clients
                "socket",
                "urllib",
                "requests.",
                "http.client",
                "ftplib",
                "telnetlib",
                // arbitrary-object deserialization
                "pickle",
                "marshal",
                "shelve",
                // blocking stdin
                "input(",
            ],
            write_tokens: vec!["open(", ".write("],
            safe_sinks: vec![
                "io.bytesio",
                "io.stringio",
                "savefig",
                "to_csv",
                "to_excel",
                "to_json",
                "buf",
            ],
        }
    }
}

impl SafetyPolicy {
    pub fn validate(&self, code: &str) -> Result<(), SafetyViolation> {
        let lower = code.to_lowercase();

        if let Some(pattern) = self.denylist.iter().find(|p| lower.contains(**p)) {
            return Err(SafetyViolation {
                pattern: (*pattern).to_string(),
                reason: "operation is denylisted for generated code".to_string(),
            });
        }

        // Write-shaped code is allowed only against known-safe sinks
        // (in-memory buffers, figure saving, tabular export).
        if let Some(write_token) = self.write_tokens.iter().find(|t| lower.contains(**t)) {
            if !self.safe_sinks.iter().any(|s| lower.contains(*s)) {
                return Err(SafetyViolation {
                    pattern: (*write_token).to_string(),
                    reason: "file write without an allowlisted sink".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SafetyPolicy {
        SafetyPolicy::default()
    }

    #[test]
    fn os_system_is_rejected() {
        let err = policy()
            .validate("import os\nos.system('rm -rf /')")
            .unwrap_err();
        assert_eq!(err.pattern, "os.system");
    }

    #[test]
    fn eval_is_rejected_case_insensitively() {
        assert!(policy().validate("result = EVAL('1+1')").is_err());
    }

    #[test]
    fn figure_save_to_buffer_is_allowed() {
        policy()
            .validate("import matplotlib.pyplot as plt\nplt.savefig(buf)")
            .expect("savefig to buffer is a safe sink");
    }

    #[test]
    fn raw_file_write_without_sink_is_rejected() {
        let err = policy().validate("f = open('out.txt','w')").unwrap_err();
        assert_eq!(err.pattern, "open(");
    }

    #[test]
    fn buffered_write_with_sink_is_allowed() {
        policy()
            .validate("buf = io.BytesIO()\nbuf.write(payload)")
            .expect("in-memory buffer writes are exempt");
    }

    #[test]
    fn network_clients_are_rejected() {
        assert!(policy().validate("import requests\nrequests.get(url)").is_err());
        assert!(policy().validate("import socket").is_err());
    }

    #[test]
    fn plain_computation_is_allowed() {
        policy()
            .validate("import pandas as pd\ndf = pd.DataFrame({'a': [1, 2]})\nprint(df.mean())")
            .expect("plain analysis code passes");
    }
}
