//! Shell command rendering for the command channel of every transport.
//!
//! Backends only need a way to run one shell line on the target. Working
//! directory changes, environment exports, privilege escalation, and the file
//! operations are all expressed as shell text here so that they behave the
//! same way over SSH, an SSM session, or the local shell.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use shell_escape::unix::escape;

use super::Invocation;

const EXISTS_MARKER: &str = "present";
const ABSENT_MARKER: &str = "absent";

/// Quotes a remote path, keeping a leading `~/` expandable by the shell.
#[must_use]
pub fn quote_path(path: &str) -> String {
    if path == "~" {
        return String::from("\"$HOME\"");
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return format!("\"$HOME\"/{}", escape(rest.into()));
    }
    escape(path.into()).into_owned()
}

/// Renders `KEY=VALUE` pairs as `export` statements, one per line.
#[must_use]
pub fn env_script(env: &BTreeMap<String, String>) -> String {
    env.iter()
        .map(|(key, value)| format!("export {key}={}\n", escape(value.as_str().into())))
        .collect()
}

/// Renders the full command line executed on the target for `invocation`.
///
/// The environment is exported first, then the working directory is entered,
/// then the command runs. With privilege escalation the whole line runs in a
/// `sudo sh -c` subshell so exports and redirections are privileged too.
#[must_use]
pub fn render(invocation: &Invocation<'_>) -> String {
    let mut line = String::new();
    for (key, value) in invocation.env {
        line.push_str("export ");
        line.push_str(key);
        line.push('=');
        line.push_str(escape(value.as_str().into()).as_ref());
        line.push_str("; ");
    }
    line.push_str("cd ");
    line.push_str(&quote_path(invocation.dir));
    line.push_str(" && ");
    line.push_str(invocation.command);

    if invocation.sudo {
        format!("sudo sh -c {}", escape(line.into()))
    } else {
        line
    }
}

/// Command printing whether `path` exists.
#[must_use]
pub fn file_exists_command(path: &str) -> String {
    format!(
        "if [ -e {} ]; then echo {EXISTS_MARKER}; else echo {ABSENT_MARKER}; fi",
        quote_path(path)
    )
}

/// Interprets the output of [`file_exists_command`].
#[must_use]
pub fn parse_exists(stdout: &str) -> Option<bool> {
    match stdout.trim() {
        EXISTS_MARKER => Some(true),
        ABSENT_MARKER => Some(false),
        _ => None,
    }
}

/// Command writing `content` to `path`, creating the parent directory.
///
/// Content travels base64 encoded so arbitrary bytes survive every quoting
/// layer between the orchestrator and the target shell.
#[must_use]
pub fn write_file_command(path: &str, content: &[u8]) -> String {
    let encoded = STANDARD.encode(content);
    let quoted = quote_path(path);
    format!(
        "mkdir -p \"$(dirname {quoted})\" && printf '%s' {} | base64 -d > {quoted}",
        escape(encoded.into())
    )
}

/// Command creating `path` and any missing parents.
#[must_use]
pub fn ensure_dir_command(path: &str) -> String {
    format!("mkdir -p {}", quote_path(path))
}

/// Command removing `path` recursively; absent paths are not an error.
#[must_use]
pub fn delete_path_command(path: &str) -> String {
    format!("rm -rf {}", quote_path(path))
}

/// Parent directory of a remote path, falling back to `.`.
#[must_use]
pub fn remote_parent(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => ".",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn invocation<'a>(
        command: &'a str,
        dir: &'a str,
        env: &'a BTreeMap<String, String>,
        sudo: bool,
    ) -> Invocation<'a> {
        Invocation {
            command,
            dir,
            env,
            sudo,
        }
    }

    #[test]
    fn render_exports_env_and_changes_directory() {
        let env = BTreeMap::from([(String::from("AEM_CLI_VERSION"), String::from("1.2.3"))]);
        let line = render(&invocation("sh aemw instance status", "/data/aemc", &env, false));

        assert_eq!(
            line,
            "export AEM_CLI_VERSION=1.2.3; cd /data/aemc && sh aemw instance status"
        );
    }

    #[test]
    fn render_wraps_whole_line_when_privileged() {
        let env = BTreeMap::from([(String::from("MODE"), String::from("a b"))]);
        let line = render(&invocation("systemctl start aem.service", ".", &env, true));

        assert!(line.starts_with("sudo sh -c '"), "line: {line}");
        assert!(line.contains("systemctl start aem.service"), "line: {line}");
        assert!(line.contains("MODE="), "line: {line}");
    }

    #[rstest]
    #[case("/mnt/aemc", "/mnt/aemc")]
    #[case("~/data/dev", "\"$HOME\"/data/dev")]
    #[case("~", "\"$HOME\"")]
    #[case("/tmp/a b", "'/tmp/a b'")]
    fn quote_path_keeps_home_expandable(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(quote_path(path), expected);
    }

    #[rstest]
    #[case("/etc/profile.d/aem.sh", "/etc/profile.d")]
    #[case("/aemw", "/")]
    #[case("aemw", ".")]
    #[case("/data/aemc/lib/", "/data/aemc")]
    fn remote_parent_strips_last_component(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(remote_parent(path), expected);
    }

    #[test]
    fn write_file_command_encodes_content() {
        let command = write_file_command("/tmp/x/aem.yml", b"a: 'b'\n");

        assert!(command.contains("base64 -d > /tmp/x/aem.yml"), "{command}");
        assert!(command.contains(&STANDARD.encode(b"a: 'b'\n")), "{command}");
        assert!(command.starts_with("mkdir -p \"$(dirname /tmp/x/aem.yml)\""));
    }

    #[test]
    fn env_script_emits_one_export_per_line() {
        let env = BTreeMap::from([
            (String::from("A"), String::from("1")),
            (String::from("B"), String::from("two words")),
        ]);

        assert_eq!(env_script(&env), "export A=1\nexport B='two words'\n");
    }

    #[rstest]
    #[case("present\n", Some(true))]
    #[case("absent", Some(false))]
    #[case("Permission denied", None)]
    fn parse_exists_reads_marker(#[case] stdout: &str, #[case] expected: Option<bool>) {
        assert_eq!(parse_exists(stdout), expected);
    }
}
