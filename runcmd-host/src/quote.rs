// ABOUTME: quoting helpers for embedding argv elements in helper scripts and dialog text.
// ABOUTME: only used where a platform helper insists on a single script string.

pub fn posix(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

pub fn powershell(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "''"))
}

pub fn applescript(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', r"\\").replace('"', "\\\""))
}

/// Quotes one argument for a Windows command line, the way the C runtime splits it.
pub fn msvc_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }
    let mut out = String::from("\"");
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                out.push_str(&"\\".repeat(backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            _ => {
                out.push_str(&"\\".repeat(backslashes));
                out.push(c);
                backslashes = 0;
            }
        }
    }
    out.push_str(&"\\".repeat(backslashes * 2));
    out.push('"');
    out
}

pub fn command_line(command: &str, args: &[String]) -> String {
    std::iter::once(posix(command))
        .chain(args.iter().map(|a| posix(a)))
        .collect::<Vec<_>>()
        .join(" ")
}
