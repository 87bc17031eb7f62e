// PSET EXTERNAL TOOL TEMPLATES
// EVERY EXTERNAL COMMAND THE SCRIPT CALLS IS A TEMPLATE WITH {PLACEHOLDERS}.
// DEFAULTS: taskset, perf stat, coreutils timeout, intel-cmt-cat pqos.

use std::borrow::Cow;

use serde::Deserialize;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tools {
    /// `{cpu}`
    pub affinity: String,
    /// `{output}` and `{events}` (comma separated)
    pub counters: String,
    /// `{duration}`
    pub timeout: String,
    /// `{class}` and `{mask}`
    pub partition_define: String,
    /// `{class}` and `{cpu}`
    pub partition_assign: String,
    pub partition_reset: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            affinity: "taskset -c {cpu}".into(),
            counters: "perf stat -o {output} --no-big-num -e {events}".into(),
            timeout: "timeout {duration}".into(),
            partition_define: "pqos -e 'llc:{class}={mask}'".into(),
            partition_assign: "pqos -a 'llc:{class}={cpu}'".into(),
            partition_reset: "pqos -R".into(),
        }
    }
}

impl Tools {
    pub fn affinity(&self, cpu: u32) -> String {
        self.affinity.replace("{cpu}", &cpu.to_string())
    }

    pub fn counters(&self, output: &str, events: &[&str]) -> String {
        self.counters
            .replace("{output}", &shell_quote(output))
            .replace("{events}", &events.join(","))
    }

    pub fn timeout(&self, duration: &str) -> String {
        self.timeout.replace("{duration}", duration)
    }

    pub fn partition_define(&self, class: u32, mask: u64) -> String {
        self.partition_define
            .replace("{class}", &class.to_string())
            .replace("{mask}", &format!("{:#x}", mask))
    }

    pub fn partition_assign(&self, class: u32, cpu: u32) -> String {
        self.partition_assign
            .replace("{class}", &class.to_string())
            .replace("{cpu}", &cpu.to_string())
    }

    // COMMAND NAMES THE `check` SUBCOMMAND LOOKS FOR ON $PATH
    pub fn programs(&self) -> Vec<&str> {
        let mut names: Vec<&str> = [
            self.affinity.as_str(),
            self.counters.as_str(),
            self.timeout.as_str(),
            self.partition_define.as_str(),
            self.partition_reset.as_str(),
        ]
        .into_iter()
        .filter_map(|t| t.split_whitespace().next())
        .collect();
        names.dedup();
        names
    }
}

// SINGLE-QUOTE A WORD FOR bash UNLESS IT IS MADE OF PLAIN PATH CHARACTERS.
// AN EMBEDDED ' BECOMES '\''
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    let plain = |c: char| c.is_ascii_alphanumeric() || "_-./:@%+=,".contains(c);
    if !word.is_empty() && word.chars().all(plain) {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}
