//! Validation result type shared by [`super::settings::GatewaySettings`],
//! separating hard errors from non-fatal warnings and recommendations.

/// Outcome of validating a configuration: errors block startup, warnings
/// and recommendations are logged but never fatal.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_recommendation(&mut self, recommendation: String) {
        self.recommendations.push(recommendation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_result_is_valid_with_no_findings() {
        let result = ValidationResult::new();
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn adding_an_error_flips_is_valid() {
        let mut result = ValidationResult::new();
        result.add_error("bad port".to_string());
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn warnings_do_not_affect_validity() {
        let mut result = ValidationResult::new();
        result.add_warning("sampling below 1.0".to_string());
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
    }
}
