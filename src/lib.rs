pub mod io;
pub mod plot;
pub mod reduce;
pub mod svd;

pub use io::{list_branches, load_branches, read_table, write_table, EventTable};
pub use plot::{plot_2d, plot_3d, Backend, PlotOptions};
pub use reduce::{run_pca, run_reduce, run_tsne, run_umap, Method, ReduceOptions};
