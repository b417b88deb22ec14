use std::sync::LazyLock;

use regex::Regex;

/// Runs of characters that are neither alphanumeric, underscore, hyphen,
/// dot nor whitespace, or runs of whitespace.
static PUNCT_OR_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s\-.]+|\s+").expect("valid pattern"));

static TRAILING_DOTS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.+$").expect("valid pattern"));

static DOT_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.+").expect("valid pattern"));

/// Reformats a raw item key into a sink-compatible metric key.
///
/// Zabbix item keys carry bracketed parameter lists:
///
/// ```text
/// vfs.fs.inode[/etc/resolv.conf,pfree]
/// system.cpu.util[,user]
/// zabbix[process,alert manager,avg,busy]
/// ```
///
/// Punctuation and whitespace runs become a single dot, trailing dots are
/// stripped, dot runs collapse to one, and the result is lowercased.
pub fn normalize_key(raw: &str) -> String {
    let replaced = PUNCT_OR_WHITESPACE.replace_all(raw, ".");
    let stripped = TRAILING_DOTS.replace(&replaced, "");
    let collapsed = DOT_RUNS.replace_all(&stripped, ".");
    collapsed.to_lowercase()
}

/// Reformats a raw host name into a sink-compatible origin identifier.
///
/// Same punctuation/whitespace substitution as [`normalize_key`], then
/// underscores become dots. Case is preserved.
pub fn normalize_origin(raw: &str) -> String {
    PUNCT_OR_WHITESPACE.replace_all(raw, ".").replace('_', ".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bracketed_path() {
        assert_eq!(
            normalize_key("vfs.fs.inode[/etc/resolv.conf,pfree]"),
            "vfs.fs.inode.etc.resolv.conf.pfree"
        );
    }

    #[test]
    fn test_key_embedded_whitespace() {
        assert_eq!(
            normalize_key("zabbix[process,alert manager,avg,busy]"),
            "zabbix.process.alert.manager.avg.busy"
        );
    }

    #[test]
    fn test_key_empty_parameter() {
        assert_eq!(normalize_key("system.cpu.util[,user]"), "system.cpu.util.user");
    }

    #[test]
    fn test_key_lowercases() {
        assert_eq!(normalize_key("Net.If.In[eth0]"), "net.if.in.eth0");
    }

    #[test]
    fn test_key_preserves_hyphen_and_underscore() {
        assert_eq!(normalize_key("proc_num[zabbix-agentd]"), "proc_num.zabbix-agentd");
    }

    #[test]
    fn test_key_plain_passthrough() {
        assert_eq!(normalize_key("system.uptime"), "system.uptime");
    }

    #[test]
    fn test_origin_underscores_become_dots() {
        assert_eq!(normalize_origin("host-01_rack_a"), "host-01.rack.a");
    }

    #[test]
    fn test_origin_whitespace_run() {
        assert_eq!(normalize_origin("web_01.server com"), "web.01.server.com");
    }

    #[test]
    fn test_origin_preserves_case() {
        assert_eq!(normalize_origin("Web_Frontend"), "Web.Frontend");
    }
}
