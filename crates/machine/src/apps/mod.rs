//! The application catalogue.
//!
//! Applications are a closed sum type: the catalogue is fixed at build
//! time and dispatch is a `match`, not dynamic loading. Each application
//! owns nothing but its identity (instance id and reserved address); all
//! state lives in the two stores and is reached through the
//! [`ExecutionContext`] so that gas accrues and writes stay buffered, even
//! across internal cross-application calls (AMM and marketplace both call
//! into the assets application with the caller's own context).

pub mod amm;
pub mod assets;
pub mod chat;
pub mod marketplace;
pub mod mcm;

use std::collections::BTreeMap;

use mam_common::{Address, InstanceId};

use crate::constants::{
    APP_TYPE_AMM, APP_TYPE_ASSETS, APP_TYPE_CHAT, APP_TYPE_MARKETPLACE,
};
use crate::context::ExecutionContext;
use crate::errors::VmError;

pub use amm::Amm;
pub use assets::Assets;
pub use chat::Chat;
pub use marketplace::Marketplace;
pub use mcm::Mcm;

/// Immutable view of the registered applications and the chain height,
/// handed to every `execute` so applications can reach each other without
/// process-global state.
pub struct Catalogue<'a> {
    apps: &'a BTreeMap<InstanceId, App>,
    bnum: u64,
}

impl<'a> Catalogue<'a> {
    pub(crate) fn new(apps: &'a BTreeMap<InstanceId, App>, bnum: u64) -> Self {
        Self { apps, bnum }
    }

    /// Look up a registered application instance.
    pub fn app(&self, id: InstanceId) -> Result<&'a App, VmError> {
        self.apps.get(&id).ok_or(VmError::UnknownApp(id))
    }

    /// Current block number of the external chain.
    pub fn bnum(&self) -> u64 {
        self.bnum
    }
}

/// A deployed application instance.
#[derive(Debug, Clone)]
pub enum App {
    Mcm(Mcm),
    Assets(Assets),
    Amm(Amm),
    Marketplace(Marketplace),
    Chat(Chat),
}

impl App {
    /// Instantiate an application from its template type.
    ///
    /// The native-coin application is not instantiable: its single instance
    /// is bound to id 0 by the runtime at construction.
    pub fn from_template(
        template_type: u8,
        instance_id: InstanceId,
        instance_address: Address,
    ) -> Result<App, VmError> {
        match template_type {
            APP_TYPE_ASSETS => Ok(App::Assets(Assets::new(instance_id, instance_address))),
            APP_TYPE_AMM => Ok(App::Amm(Amm::new(instance_id, instance_address))),
            APP_TYPE_MARKETPLACE => Ok(App::Marketplace(Marketplace::new(
                instance_id,
                instance_address,
            ))),
            APP_TYPE_CHAT => Ok(App::Chat(Chat::new(instance_id, instance_address))),
            other => Err(VmError::UnknownTemplateType(other)),
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        match self {
            App::Mcm(app) => app.instance_id(),
            App::Assets(app) => app.instance_id(),
            App::Amm(app) => app.instance_id(),
            App::Marketplace(app) => app.instance_id(),
            App::Chat(app) => app.instance_id(),
        }
    }

    pub fn instance_address(&self) -> Address {
        match self {
            App::Mcm(app) => app.instance_address(),
            App::Assets(app) => app.instance_address(),
            App::Amm(app) => app.instance_address(),
            App::Marketplace(app) => app.instance_address(),
            App::Chat(app) => app.instance_address(),
        }
    }

    /// Upper bound on this instance's application storage, in bytes.
    pub fn max_storage(&self) -> usize {
        match self {
            App::Mcm(_) => Mcm::MAX_STORAGE,
            App::Assets(_) => Assets::MAX_STORAGE,
            App::Amm(_) => Amm::MAX_STORAGE,
            App::Marketplace(_) => Marketplace::MAX_STORAGE,
            App::Chat(_) => Chat::MAX_STORAGE,
        }
    }

    /// Execute one function of this application against the given context.
    pub fn execute(
        &self,
        catalogue: &Catalogue<'_>,
        caller: Address,
        selector: u8,
        params: &[u8],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), VmError> {
        match self {
            App::Mcm(app) => app.execute(caller, selector, params, ctx),
            App::Assets(app) => app.execute(caller, selector, params, ctx),
            App::Amm(app) => app.execute(catalogue, caller, selector, params, ctx),
            App::Marketplace(app) => app.execute(catalogue, caller, selector, params, ctx),
            App::Chat(app) => app.execute(caller, selector, params, ctx),
        }
    }
}

/// Replace the sub-record at `index`, or append when the record was absent.
pub(crate) fn set_app_record(records: &mut Vec<Vec<u8>>, index: Option<usize>, value: Vec<u8>) {
    match index {
        Some(index) => records[index] = value,
        None => records.push(value),
    }
}

/// Render a 4-byte token symbol for diagnostics.
pub(crate) fn symbol_display(symbol: &[u8]) -> String {
    String::from_utf8_lossy(symbol).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::APP_TYPE_MCM;

    #[test]
    fn template_instantiation_covers_the_catalogue() {
        let address = Address::instance(1);
        assert!(matches!(
            App::from_template(APP_TYPE_ASSETS, 1, address),
            Ok(App::Assets(_))
        ));
        assert!(matches!(
            App::from_template(APP_TYPE_AMM, 1, address),
            Ok(App::Amm(_))
        ));
        assert!(matches!(
            App::from_template(APP_TYPE_MARKETPLACE, 1, address),
            Ok(App::Marketplace(_))
        ));
        assert!(matches!(
            App::from_template(APP_TYPE_CHAT, 1, address),
            Ok(App::Chat(_))
        ));
    }

    #[test]
    fn native_coin_is_not_instantiable_from_a_template() {
        assert!(matches!(
            App::from_template(APP_TYPE_MCM, 1, Address::instance(1)),
            Err(VmError::UnknownTemplateType(0))
        ));
    }

    #[test]
    fn set_app_record_replaces_or_appends() {
        let mut records = vec![vec![1u8], vec![2u8]];
        set_app_record(&mut records, Some(1), vec![9u8]);
        assert_eq!(records, vec![vec![1u8], vec![9u8]]);
        set_app_record(&mut records, None, vec![3u8]);
        assert_eq!(records.len(), 3);
    }
}
