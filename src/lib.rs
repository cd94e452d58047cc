pub mod config;
#[cfg(feature = "gdal")]
pub mod dataset;
pub mod error;
pub mod gcp_list;
pub mod linalg;
pub mod model;
pub mod serialize;
pub mod spline;
pub mod transformer;
pub mod xml;

pub use config::{NumThreads, TpsOptions};
pub use error::{Result, TpsError};
pub use model::Gcp;
pub use spline::{basis_function, GeorefSpline2D, SplineBuilder, SplineKind};
pub use transformer::{TpsTransformer, Transformer};
pub use xml::XmlNode;
