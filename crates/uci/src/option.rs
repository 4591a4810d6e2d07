//! `option` declarations sent by the engine during the handshake.

use crate::UciError;

/// One option advertised by the engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptionDecl {
    /// Option name, may contain spaces (e.g. "Clear Hash").
    pub name: String,
    /// Option type: `check`, `spin`, `combo`, `button` or `string`.
    pub kind: String,
    pub default: Option<String>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    /// Allowed values of a `combo` option.
    pub vars: Vec<String>,
}

impl OptionDecl {
    /// Parse an `option name ... type ...` line.
    pub fn parse(line: &str) -> Result<Self, UciError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.first() != Some(&"option") {
            return Err(UciError::ParseError(format!("Not an option line: '{}'", line)));
        }

        let mut decl = OptionDecl::default();
        let mut i = 1;
        while i < parts.len() {
            let keyword = parts[i];
            let start = i + 1;
            let mut end = start;
            while end < parts.len() && !is_option_keyword(parts[end]) {
                end += 1;
            }
            let value = parts[start..end].join(" ");

            match keyword {
                "name" => decl.name = value,
                "type" => decl.kind = value,
                "default" => decl.default = Some(value),
                "min" => decl.min = value.parse().ok(),
                "max" => decl.max = value.parse().ok(),
                "var" => decl.vars.push(value),
                _ => {}
            }
            i = end;
        }

        if decl.name.is_empty() {
            return Err(UciError::ParseError(format!("Option without name: '{}'", line)));
        }
        Ok(decl)
    }

    /// Format as an `option` line.
    pub fn to_uci(&self) -> String {
        let mut parts = vec![format!("option name {} type {}", self.name, self.kind)];
        if let Some(ref d) = self.default {
            parts.push(format!("default {}", d));
        }
        if let Some(m) = self.min {
            parts.push(format!("min {}", m));
        }
        if let Some(m) = self.max {
            parts.push(format!("max {}", m));
        }
        for v in &self.vars {
            parts.push(format!("var {}", v));
        }
        parts.join(" ")
    }
}

fn is_option_keyword(s: &str) -> bool {
    matches!(s, "name" | "type" | "default" | "min" | "max" | "var")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_spin_option() {
        let decl = OptionDecl::parse("option name Hash type spin default 16 min 1 max 33554432")
            .unwrap();
        assert_eq!(decl.name, "Hash");
        assert_eq!(decl.kind, "spin");
        assert_eq!(decl.default.as_deref(), Some("16"));
        assert_eq!(decl.min, Some(1));
        assert_eq!(decl.max, Some(33554432));
    }

    #[test]
    fn parse_button_with_spaced_name() {
        let decl = OptionDecl::parse("option name Clear Hash type button").unwrap();
        assert_eq!(decl.name, "Clear Hash");
        assert_eq!(decl.kind, "button");
        assert_eq!(decl.default, None);
    }

    #[test]
    fn parse_combo_vars() {
        let decl = OptionDecl::parse(
            "option name Style type combo default Normal var Solid var Normal var Risky",
        )
        .unwrap();
        assert_eq!(decl.vars, vec!["Solid", "Normal", "Risky"]);
        assert_eq!(OptionDecl::parse(&decl.to_uci()).unwrap(), decl);
    }

    #[test]
    fn parse_requires_name() {
        assert!(OptionDecl::parse("option type spin").is_err());
    }
}
