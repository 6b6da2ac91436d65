//! Per-game UI themes

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    DefaultDark,
    DefaultLight,
    PhosTeal,
    RoyalRed,
    ClassicOrange,
}

impl Theme {
    pub const ALL: [Theme; 5] = [
        Theme::DefaultDark,
        Theme::DefaultLight,
        Theme::PhosTeal,
        Theme::RoyalRed,
        Theme::ClassicOrange,
    ];

    /// Display name, as stored in the games config
    pub fn name(self) -> &'static str {
        match self {
            Theme::DefaultDark => "Default Dark",
            Theme::DefaultLight => "Default Light",
            Theme::PhosTeal => "Phos Teal",
            Theme::RoyalRed => "Royal Red",
            Theme::ClassicOrange => "Classic Orange",
        }
    }

    /// CSS class the front end applies
    pub fn css(self) -> &'static str {
        match self {
            Theme::DefaultDark => "defaultDark",
            Theme::DefaultLight => "defaultLight",
            Theme::PhosTeal => "phos",
            Theme::RoyalRed => "royal",
            Theme::ClassicOrange => "classic",
        }
    }

    pub fn from_name(name: &str) -> Option<Theme> {
        Self::ALL.into_iter().find(|theme| theme.name() == name)
    }

    /// CSS for a stored theme name; unknown or missing names get Default Dark
    pub fn css_for(name: Option<&str>) -> &'static str {
        name.and_then(Self::from_name)
            .unwrap_or(Theme::DefaultDark)
            .css()
    }

    pub fn names() -> Vec<String> {
        Self::ALL.iter().map(|theme| theme.name().to_string()).collect()
    }
}
