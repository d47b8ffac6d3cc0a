pub mod client;
pub mod definition;
pub mod dispatch;
pub mod mapping;

pub use self::{
    client::{CallOptions, Connector, KubeApi, KubeConnector, ResourceApi},
    definition::ResourceDefinition,
    dispatch::{Dispatcher, ResourceRef},
    mapping::{Action, ApiMapping, Route, Routes},
};
