use fxhash::FxBuildHasher;

// Construct with `Map::default()`, the hasher is not the hashbrown default one.
pub type Map<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;
pub type Set<T> = hashbrown::HashSet<T, FxBuildHasher>;
