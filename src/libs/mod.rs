pub mod cel;
pub mod design;
pub mod io;
pub mod meta;
pub mod mixture;
pub mod normalize;
