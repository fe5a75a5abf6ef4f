// libs/exo_types/src/error.rs
use core::fmt;

/// Type de résultat standard pour Exo-OS
pub type Result<T> = core::result::Result<T, ExoError>;

/// Codes d'erreur renvoyés par le noyau (valeurs négatives sur l'ABI)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Erreur non précisée
    Unspecified = 1,

    /// Environnement inexistant ou accès refusé
    BadEnv = 2,

    /// Paramètre invalide
    Invalid = 3,

    /// Mémoire insuffisante
    NoMem = 4,

    /// Table des environnements pleine
    NoFreeEnv = 5,

    /// Faute mémoire
    Fault = 6,
}

impl ErrorCode {
    /// Décode un retour brut d'appel système (`< 0`)
    pub fn from_raw(raw: i32) -> Self {
        match raw.wrapping_neg() {
            2 => ErrorCode::BadEnv,
            3 => ErrorCode::Invalid,
            4 => ErrorCode::NoMem,
            5 => ErrorCode::NoFreeEnv,
            6 => ErrorCode::Fault,
            _ => ErrorCode::Unspecified,
        }
    }

    /// Valeur brute sur l'ABI
    pub const fn as_raw(self) -> i32 {
        -(self as i32)
    }
}

/// Structure d'erreur pour Exo-OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExoError {
    /// Code d'erreur
    code: ErrorCode,

    /// Message descriptif
    message: Option<&'static str>,

    /// Identifiant optionnel pour le contexte (adresse, envid...)
    context_id: Option<u64>,
}

impl ExoError {
    /// Crée une nouvelle erreur avec un code
    pub fn new(code: ErrorCode) -> Self {
        ExoError {
            code,
            message: None,
            context_id: None,
        }
    }

    /// Crée une erreur avec un message
    pub fn with_message(code: ErrorCode, message: &'static str) -> Self {
        ExoError {
            code,
            message: Some(message),
            context_id: None,
        }
    }

    /// Définit un identifiant de contexte
    pub fn with_context(mut self, id: u64) -> Self {
        self.context_id = Some(id);
        self
    }

    /// Retourne le code d'erreur
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Retourne le message d'erreur
    pub fn message(&self) -> Option<&'static str> {
        self.message
    }

    pub fn context(&self) -> Option<u64> {
        self.context_id
    }
}

impl fmt::Display for ExoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            ErrorCode::Unspecified => write!(f, "Unspecified error"),
            ErrorCode::BadEnv => write!(f, "Bad environment"),
            ErrorCode::Invalid => write!(f, "Invalid parameter"),
            ErrorCode::NoMem => write!(f, "Out of memory"),
            ErrorCode::NoFreeEnv => write!(f, "Out of environments"),
            ErrorCode::Fault => write!(f, "Segmentation fault"),
        }?;

        if let Some(msg) = self.message {
            write!(f, ": {}", msg)?;
        }

        if let Some(id) = self.context_id {
            write!(f, " (context: {:#x})", id)?;
        }

        Ok(())
    }
}

impl From<ErrorCode> for ExoError {
    fn from(code: ErrorCode) -> Self {
        ExoError::new(code)
    }
}
