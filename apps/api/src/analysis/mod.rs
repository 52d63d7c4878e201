// Output normalization for finished executions.
// Everything the presentation layer sees passes through `Normalizer` first.

pub mod normalizer;
