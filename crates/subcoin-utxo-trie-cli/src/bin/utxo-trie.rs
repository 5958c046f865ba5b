fn main() -> subcoin_utxo_trie_cli::Result<()> {
    subcoin_utxo_trie_cli::run()
}
