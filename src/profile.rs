//! Student profile and the mentor's scripted lines.
//!
//! The profile is captured once at onboarding and stays immutable until a
//! full reset. The system instruction and every canned mentor line are
//! built here so the conversation layers never hold UI copy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mexican secundaria grade levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    #[default]
    Primero,
    Segundo,
    Tercero,
}

impl Grade {
    /// Parse a 1–3 menu choice.
    #[must_use]
    pub fn from_choice(choice: u8) -> Option<Self> {
        match choice {
            1 => Some(Self::Primero),
            2 => Some(Self::Segundo),
            3 => Some(Self::Tercero),
            _ => None,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Primero => "1° de Secundaria",
            Self::Segundo => "2° de Secundaria",
            Self::Tercero => "3° de Secundaria",
        };
        f.write_str(label)
    }
}

/// Onboarding data for one student.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentProfile {
    pub name: String,
    pub grade: Grade,
    /// Free-form interests (movies, games, series...) used for analogies.
    pub interests: String,
}

impl StudentProfile {
    /// Whether enough was captured to start tutoring.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && !self.interests.trim().is_empty()
    }

    /// Build the live session's system instruction from the profile.
    #[must_use]
    pub fn system_instruction(&self) -> String {
        format!(
            "Eres MentorIA, un tutor digital amigable y paciente para {name}, un estudiante \
             de {grade} de secundaria en México. Tu tono debe ser coloquial y entusiasta, \
             usando jerga mexicana apropiada para un adolescente (ej. 'qué chido', 'qué onda', \
             'te late', 'un paro'). Tu misión es explicar conceptos académicos usando los \
             intereses personales de {name}, que son: {interests}. NO des respuestas directas \
             a las tareas. Guía a {name} para que aprenda y descubra las respuestas por sí \
             mismo. Fomenta su curiosidad. Usa analogías creativas basadas en sus intereses.",
            name = self.name,
            grade = self.grade,
            interests = self.interests,
        )
    }

    /// Greeting spoken right after onboarding completes.
    #[must_use]
    pub fn intro_line(&self) -> String {
        format!(
            "¡Perfecto, {}! Ya con eso. Ahora sí, ¿en qué te puedo ayudar hoy? \
             ¿Qué tema quieres que chequemos o para qué tarea necesitas un paro?",
            self.name
        )
    }
}

/// Mentor line when the microphone cannot be acquired.
pub const MIC_ERROR_LINE: &str =
    "No pude acceder a tu micrófono. Revisa los permisos y vuelve a intentarlo.";

/// Mentor line when the live session fails.
pub const SESSION_ERROR_LINE: &str = "Hubo un error en la conexión. Intenta de nuevo.";

/// Mentor line when speech synthesis fails.
pub const TTS_ERROR_LINE: &str = "Oops, tuve un problema con mi voz. Inténtalo de nuevo.";

/// Mentor line when the student ends the current topic.
pub const END_TOPIC_LINE: &str =
    "¡Claro! Cuando estés listo para otro tema, solo presiona el micrófono.";
