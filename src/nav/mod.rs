pub mod locator;
pub mod navigator;
pub mod routing;
