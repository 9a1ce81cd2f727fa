// Learner-facing message catalogue

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    Es,
    En,
}

impl Locale {
    /// Unknown tags fall back to Spanish
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "en" | "en-us" | "en-gb" | "english" => Locale::En,
            _ => Locale::Es,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Messages {
    locale: Locale,
}

impl Messages {
    pub fn new(locale: Locale) -> Self {
        Self { locale }
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn invalid_problem_id(&self, id: i64) -> String {
        match self.locale {
            Locale::Es => format!("ID de problema inválido: {}", id),
            Locale::En => format!("Invalid problem id: {}", id),
        }
    }

    pub fn empty_code(&self) -> String {
        match self.locale {
            Locale::Es => "El código no puede estar vacío".to_string(),
            Locale::En => "Code must not be empty".to_string(),
        }
    }

    /// `total` distinguishes an unseeded catalogue from a bad id
    pub fn problem_not_found(&self, id: i64, total: u64) -> String {
        match (self.locale, total) {
            (Locale::Es, 0) => format!(
                "Problema {} no encontrado: no hay problemas cargados (total: 0). ¿Se inicializó la base de datos?",
                id
            ),
            (Locale::Es, n) => format!("Problema {} no encontrado (total de problemas: {})", id, n),
            (Locale::En, 0) => format!(
                "Problem {} not found: no problems are loaded (total: 0). Was the database seeded?",
                id
            ),
            (Locale::En, n) => format!("Problem {} not found (total problems: {})", id, n),
        }
    }

    pub fn execution_error(&self, detail: &str) -> String {
        match self.locale {
            Locale::Es => format!("Error al ejecutar tu código:\n{}", detail),
            Locale::En => format!("Your code failed to run:\n{}", detail),
        }
    }

    pub fn correct(&self) -> String {
        match self.locale {
            Locale::Es => "¡Correcto! Tu solución produce la salida esperada.".to_string(),
            Locale::En => "Correct! Your solution produces the expected output.".to_string(),
        }
    }

    pub fn incorrect(&self) -> String {
        match self.locale {
            Locale::Es => "Incorrecto. La salida no coincide con la esperada.".to_string(),
            Locale::En => "Incorrect. The output does not match the expected output.".to_string(),
        }
    }

    /// Appended when the verdict came from the similarity fallback alone
    pub fn heuristic_note(&self) -> String {
        match self.locale {
            Locale::Es => {
                "(La solución de referencia no pudo ejecutarse; el veredicto se decidió por similitud de código.)"
                    .to_string()
            }
            Locale::En => {
                "(The reference solution could not run; the verdict was decided by code similarity.)"
                    .to_string()
            }
        }
    }

    pub fn reference_unavailable(&self) -> String {
        match self.locale {
            Locale::Es => "[salida esperada no disponible]".to_string(),
            Locale::En => "[expected output unavailable]".to_string(),
        }
    }

    pub fn timeout(&self, timeout_ms: u64) -> String {
        let seconds = timeout_ms as f64 / 1000.0;
        match self.locale {
            Locale::Es => format!(
                "Tiempo de ejecución excedido ({} s). ¿Hay un bucle infinito?",
                seconds
            ),
            Locale::En => format!("Execution timed out ({} s). Is there an infinite loop?", seconds),
        }
    }

    pub fn unsupported_language(&self, tag: &str, supported: &[String]) -> String {
        let list = supported.join(", ");
        match self.locale {
            Locale::Es => format!(
                "Lenguaje no soportado: '{}'. Lenguajes soportados: {}",
                tag, list
            ),
            Locale::En => format!("Language not supported: '{}'. Supported languages: {}", tag, list),
        }
    }

    pub fn interpreter_missing(&self, tried: &[String]) -> String {
        let list = tried.join(", ");
        match self.locale {
            Locale::Es => format!("No se encontró el intérprete (probados: {})", list),
            Locale::En => format!("Interpreter not found (tried: {})", list),
        }
    }

    pub fn source_too_large(&self, limit: usize) -> String {
        match self.locale {
            Locale::Es => format!("El código excede el tamaño máximo de {} bytes", limit),
            Locale::En => format!("Source code exceeds the maximum size of {} bytes", limit),
        }
    }

    pub fn internal_error(&self, detail: &str) -> String {
        match self.locale {
            Locale::Es => format!("Error interno al validar: {}", detail),
            Locale::En => format!("Internal error during validation: {}", detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_from_tag() {
        assert_eq!(Locale::from_tag("EN"), Locale::En);
        assert_eq!(Locale::from_tag("es"), Locale::Es);
        assert_eq!(Locale::from_tag("fr"), Locale::Es);
    }

    #[test]
    fn test_not_found_mentions_total() {
        let messages = Messages::new(Locale::En);
        assert!(messages.problem_not_found(4, 0).contains("total: 0"));
        assert!(messages.problem_not_found(4, 12).contains("12"));
    }

    #[test]
    fn test_unsupported_language_lists_supported() {
        let messages = Messages::new(Locale::Es);
        let text = messages.unsupported_language("ruby", &["csharp".into(), "python".into()]);
        assert!(text.contains("ruby"));
        assert!(text.contains("csharp, python"));
    }

    #[test]
    fn test_timeout_in_seconds() {
        let messages = Messages::new(Locale::En);
        assert!(messages.timeout(10_000).contains("10 s"));
        assert!(messages.timeout(1_500).contains("1.5 s"));
    }
}
