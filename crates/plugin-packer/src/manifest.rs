/// Jar manifest generation

/// Entry name of the manifest inside a jar
pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// Longest manifest line in bytes, excluding the line break
const MAX_LINE_BYTES: usize = 72;

/// Main section of a jar manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JarManifest {
    attributes: Vec<(String, String)>,
}

impl Default for JarManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl JarManifest {
    /// Minimal manifest: version plus the tool that created it
    pub fn new() -> Self {
        Self {
            attributes: vec![
                ("Manifest-Version".to_string(), "1.0".to_string()),
                (
                    "Created-By".to_string(),
                    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
                ),
            ],
        }
    }

    /// Add or replace an attribute
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    /// Render the manifest bytes.
    ///
    /// Lines end in CRLF and never exceed 72 bytes; longer headers continue
    /// on lines starting with a single space. The section ends with an empty
    /// line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.attributes {
            write_wrapped(&mut out, &format!("{}: {}", name, value));
        }
        out.push_str("\r\n");
        out
    }
}

fn write_wrapped(out: &mut String, line: &str) {
    let mut rest = line;
    let mut limit = MAX_LINE_BYTES;
    loop {
        if rest.len() <= limit {
            out.push_str(rest);
            out.push_str("\r\n");
            return;
        }

        let mut split = limit;
        while !rest.is_char_boundary(split) {
            split -= 1;
        }
        out.push_str(&rest[..split]);
        out.push_str("\r\n ");
        rest = &rest[split..];
        // Continuation lines spend one byte on the leading space
        limit = MAX_LINE_BYTES - 1;
    }
}
