use std::fmt;

/// Shapes the demo server knows how to return
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Circle,
    Rectangle,
    Square,
    Triangle,
    Unknown(String),
}

impl Shape {
    /// Parse a `/shapes` response body, case-insensitively
    pub fn from_body(body: &str) -> Self {
        let name = body.trim();
        match name.to_ascii_lowercase().as_str() {
            "circle" => Shape::Circle,
            "rectangle" => Shape::Rectangle,
            "square" => Shape::Square,
            "triangle" => Shape::Triangle,
            _ => Shape::Unknown(name.to_string()),
        }
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            Shape::Circle => "●",
            Shape::Rectangle => "▬",
            Shape::Square => "■",
            Shape::Triangle => "▲",
            Shape::Unknown(_) => "?",
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Circle => write!(f, "circle"),
            Shape::Rectangle => write!(f, "rectangle"),
            Shape::Square => write!(f, "square"),
            Shape::Triangle => write!(f, "triangle"),
            Shape::Unknown(_) => write!(f, "unknown shape"),
        }
    }
}
