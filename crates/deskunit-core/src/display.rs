//! Display seam.
//!
//! The desk controller produces plain text only; layout and rendering belong
//! to the implementation.

/// Two-region text display.
pub trait Display {
    /// Replace the single-line status area.
    fn show_status(&mut self, text: &str);

    /// Replace the multi-line message area.
    fn show_message(&mut self, text: &str);
}

impl<D: Display + ?Sized> Display for &mut D {
    fn show_status(&mut self, text: &str) {
        (**self).show_status(text);
    }

    fn show_message(&mut self, text: &str) {
        (**self).show_message(text);
    }
}

/// Status line for a reported availability.
#[must_use]
pub fn availability_line(present: bool, manual: bool) -> String {
    format!(
        "Status ({}): {}",
        if manual { "Manual" } else { "BLE" },
        if present { "Available" } else { "Unavailable" }
    )
}

/// Idle message area: who sits at this desk.
#[must_use]
pub fn faculty_card(name: &str, department: Option<&str>) -> String {
    match department {
        Some(department) if !department.trim().is_empty() => format!("{name}\n{department}"),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faculty_card() {
        assert_eq!(
            faculty_card("Dr. Reyes", Some("Computer Engineering")),
            "Dr. Reyes\nComputer Engineering"
        );
        assert_eq!(faculty_card("Dr. Reyes", Some("  ")), "Dr. Reyes");
        assert_eq!(faculty_card("Dr. Reyes", None), "Dr. Reyes");
    }

    #[test]
    fn test_availability_line() {
        assert_eq!(availability_line(true, false), "Status (BLE): Available");
        assert_eq!(availability_line(false, true), "Status (Manual): Unavailable");
    }
}
