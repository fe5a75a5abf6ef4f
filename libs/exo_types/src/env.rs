// libs/exo_types/src/env.rs
//
// Environnements (processus) tels que le noyau les expose en lecture seule.

/// Identifiant d'environnement.
///
/// `génération << ENVGENSHIFT | index`. La valeur 0 désigne
/// « l'environnement appelant » dans les appels système ; les valeurs
/// négatives sont des codes d'erreur.
pub type EnvId = i32;

pub const LOG2NENV: usize = 10;
pub const NENV: usize = 1 << LOG2NENV;
pub const ENVGENSHIFT: usize = 12;

/// Index d'un environnement dans la table `envs`
pub const fn envx(id: EnvId) -> usize {
    (id as usize) & (NENV - 1)
}

/// Statut d'un environnement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvStatus {
    #[default]
    Free,
    Dying,
    Runnable,
    Running,
    NotRunnable,
}

/// Point d'entrée utilisateur invoqué par le noyau lors d'une faute de page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Upcall(usize);

impl Upcall {
    pub const fn new(entry: usize) -> Self {
        Upcall(entry)
    }

    pub const fn entry(&self) -> usize {
        self.0
    }
}

/// Descripteur d'environnement (vue `envs[]` en lecture seule)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Env {
    pub env_id: EnvId,
    pub env_parent_id: EnvId,
    pub env_status: EnvStatus,
    pub env_pgfault_upcall: Option<Upcall>,
}
