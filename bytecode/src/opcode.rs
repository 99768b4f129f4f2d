use anyhow::{Result, bail};

macro_rules! bytecodes {
    ($($variant:ident = $value:literal, $name:literal, $length:expr, $java:ident;)*) => {
        /// Every opcode the interpreter understands: the standard set, `breakpoint`
        /// and the quickened forms that only ever appear through rewriting.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Bytecode {
            $($variant = $value,)*
        }

        impl Bytecode {
            pub const ALL: &'static [Bytecode] = &[$(Bytecode::$variant,)*];

            pub fn from_u8(value: u8) -> Result<Self> {
                Ok(match value {
                    $($value => Bytecode::$variant,)*
                    _ => bail!("unknown bytecode: {value:#x}"),
                })
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(Bytecode::$variant => $name,)*
                }
            }

            /// Fixed instruction length, `None` for switches, `wide` and `breakpoint`
            pub fn length(&self) -> Option<usize> {
                match self {
                    $(Bytecode::$variant => $length,)*
                }
            }

            /// The standard bytecode a quickened form was rewritten from
            pub fn java_code(&self) -> Bytecode {
                match self {
                    $(Bytecode::$variant => Bytecode::$java,)*
                }
            }
        }
    };
}

bytecodes! {
    Nop = 0x00, "nop", Some(1), Nop;
    AconstNull = 0x01, "aconst_null", Some(1), AconstNull;
    IconstM1 = 0x02, "iconst_m1", Some(1), IconstM1;
    Iconst0 = 0x03, "iconst_0", Some(1), Iconst0;
    Iconst1 = 0x04, "iconst_1", Some(1), Iconst1;
    Iconst2 = 0x05, "iconst_2", Some(1), Iconst2;
    Iconst3 = 0x06, "iconst_3", Some(1), Iconst3;
    Iconst4 = 0x07, "iconst_4", Some(1), Iconst4;
    Iconst5 = 0x08, "iconst_5", Some(1), Iconst5;
    Lconst0 = 0x09, "lconst_0", Some(1), Lconst0;
    Lconst1 = 0x0a, "lconst_1", Some(1), Lconst1;
    Fconst0 = 0x0b, "fconst_0", Some(1), Fconst0;
    Fconst1 = 0x0c, "fconst_1", Some(1), Fconst1;
    Fconst2 = 0x0d, "fconst_2", Some(1), Fconst2;
    Dconst0 = 0x0e, "dconst_0", Some(1), Dconst0;
    Dconst1 = 0x0f, "dconst_1", Some(1), Dconst1;
    Bipush = 0x10, "bipush", Some(2), Bipush;
    Sipush = 0x11, "sipush", Some(3), Sipush;
    Ldc = 0x12, "ldc", Some(2), Ldc;
    LdcW = 0x13, "ldc_w", Some(3), LdcW;
    Ldc2W = 0x14, "ldc2_w", Some(3), Ldc2W;
    Iload = 0x15, "iload", Some(2), Iload;
    Lload = 0x16, "lload", Some(2), Lload;
    Fload = 0x17, "fload", Some(2), Fload;
    Dload = 0x18, "dload", Some(2), Dload;
    Aload = 0x19, "aload", Some(2), Aload;
    Iload0 = 0x1a, "iload_0", Some(1), Iload0;
    Iload1 = 0x1b, "iload_1", Some(1), Iload1;
    Iload2 = 0x1c, "iload_2", Some(1), Iload2;
    Iload3 = 0x1d, "iload_3", Some(1), Iload3;
    Lload0 = 0x1e, "lload_0", Some(1), Lload0;
    Lload1 = 0x1f, "lload_1", Some(1), Lload1;
    Lload2 = 0x20, "lload_2", Some(1), Lload2;
    Lload3 = 0x21, "lload_3", Some(1), Lload3;
    Fload0 = 0x22, "fload_0", Some(1), Fload0;
    Fload1 = 0x23, "fload_1", Some(1), Fload1;
    Fload2 = 0x24, "fload_2", Some(1), Fload2;
    Fload3 = 0x25, "fload_3", Some(1), Fload3;
    Dload0 = 0x26, "dload_0", Some(1), Dload0;
    Dload1 = 0x27, "dload_1", Some(1), Dload1;
    Dload2 = 0x28, "dload_2", Some(1), Dload2;
    Dload3 = 0x29, "dload_3", Some(1), Dload3;
    Aload0 = 0x2a, "aload_0", Some(1), Aload0;
    Aload1 = 0x2b, "aload_1", Some(1), Aload1;
    Aload2 = 0x2c, "aload_2", Some(1), Aload2;
    Aload3 = 0x2d, "aload_3", Some(1), Aload3;
    Iaload = 0x2e, "iaload", Some(1), Iaload;
    Laload = 0x2f, "laload", Some(1), Laload;
    Faload = 0x30, "faload", Some(1), Faload;
    Daload = 0x31, "daload", Some(1), Daload;
    Aaload = 0x32, "aaload", Some(1), Aaload;
    Baload = 0x33, "baload", Some(1), Baload;
    Caload = 0x34, "caload", Some(1), Caload;
    Saload = 0x35, "saload", Some(1), Saload;
    Istore = 0x36, "istore", Some(2), Istore;
    Lstore = 0x37, "lstore", Some(2), Lstore;
    Fstore = 0x38, "fstore", Some(2), Fstore;
    Dstore = 0x39, "dstore", Some(2), Dstore;
    Astore = 0x3a, "astore", Some(2), Astore;
    Istore0 = 0x3b, "istore_0", Some(1), Istore0;
    Istore1 = 0x3c, "istore_1", Some(1), Istore1;
    Istore2 = 0x3d, "istore_2", Some(1), Istore2;
    Istore3 = 0x3e, "istore_3", Some(1), Istore3;
    Lstore0 = 0x3f, "lstore_0", Some(1), Lstore0;
    Lstore1 = 0x40, "lstore_1", Some(1), Lstore1;
    Lstore2 = 0x41, "lstore_2", Some(1), Lstore2;
    Lstore3 = 0x42, "lstore_3", Some(1), Lstore3;
    Fstore0 = 0x43, "fstore_0", Some(1), Fstore0;
    Fstore1 = 0x44, "fstore_1", Some(1), Fstore1;
    Fstore2 = 0x45, "fstore_2", Some(1), Fstore2;
    Fstore3 = 0x46, "fstore_3", Some(1), Fstore3;
    Dstore0 = 0x47, "dstore_0", Some(1), Dstore0;
    Dstore1 = 0x48, "dstore_1", Some(1), Dstore1;
    Dstore2 = 0x49, "dstore_2", Some(1), Dstore2;
    Dstore3 = 0x4a, "dstore_3", Some(1), Dstore3;
    Astore0 = 0x4b, "astore_0", Some(1), Astore0;
    Astore1 = 0x4c, "astore_1", Some(1), Astore1;
    Astore2 = 0x4d, "astore_2", Some(1), Astore2;
    Astore3 = 0x4e, "astore_3", Some(1), Astore3;
    Iastore = 0x4f, "iastore", Some(1), Iastore;
    Lastore = 0x50, "lastore", Some(1), Lastore;
    Fastore = 0x51, "fastore", Some(1), Fastore;
    Dastore = 0x52, "dastore", Some(1), Dastore;
    Aastore = 0x53, "aastore", Some(1), Aastore;
    Bastore = 0x54, "bastore", Some(1), Bastore;
    Castore = 0x55, "castore", Some(1), Castore;
    Sastore = 0x56, "sastore", Some(1), Sastore;
    Pop = 0x57, "pop", Some(1), Pop;
    Pop2 = 0x58, "pop2", Some(1), Pop2;
    Dup = 0x59, "dup", Some(1), Dup;
    DupX1 = 0x5a, "dup_x1", Some(1), DupX1;
    DupX2 = 0x5b, "dup_x2", Some(1), DupX2;
    Dup2 = 0x5c, "dup2", Some(1), Dup2;
    Dup2X1 = 0x5d, "dup2_x1", Some(1), Dup2X1;
    Dup2X2 = 0x5e, "dup2_x2", Some(1), Dup2X2;
    Swap = 0x5f, "swap", Some(1), Swap;
    Iadd = 0x60, "iadd", Some(1), Iadd;
    Ladd = 0x61, "ladd", Some(1), Ladd;
    Fadd = 0x62, "fadd", Some(1), Fadd;
    Dadd = 0x63, "dadd", Some(1), Dadd;
    Isub = 0x64, "isub", Some(1), Isub;
    Lsub = 0x65, "lsub", Some(1), Lsub;
    Fsub = 0x66, "fsub", Some(1), Fsub;
    Dsub = 0x67, "dsub", Some(1), Dsub;
    Imul = 0x68, "imul", Some(1), Imul;
    Lmul = 0x69, "lmul", Some(1), Lmul;
    Fmul = 0x6a, "fmul", Some(1), Fmul;
    Dmul = 0x6b, "dmul", Some(1), Dmul;
    Idiv = 0x6c, "idiv", Some(1), Idiv;
    Ldiv = 0x6d, "ldiv", Some(1), Ldiv;
    Fdiv = 0x6e, "fdiv", Some(1), Fdiv;
    Ddiv = 0x6f, "ddiv", Some(1), Ddiv;
    Irem = 0x70, "irem", Some(1), Irem;
    Lrem = 0x71, "lrem", Some(1), Lrem;
    Frem = 0x72, "frem", Some(1), Frem;
    Drem = 0x73, "drem", Some(1), Drem;
    Ineg = 0x74, "ineg", Some(1), Ineg;
    Lneg = 0x75, "lneg", Some(1), Lneg;
    Fneg = 0x76, "fneg", Some(1), Fneg;
    Dneg = 0x77, "dneg", Some(1), Dneg;
    Ishl = 0x78, "ishl", Some(1), Ishl;
    Lshl = 0x79, "lshl", Some(1), Lshl;
    Ishr = 0x7a, "ishr", Some(1), Ishr;
    Lshr = 0x7b, "lshr", Some(1), Lshr;
    Iushr = 0x7c, "iushr", Some(1), Iushr;
    Lushr = 0x7d, "lushr", Some(1), Lushr;
    Iand = 0x7e, "iand", Some(1), Iand;
    Land = 0x7f, "land", Some(1), Land;
    Ior = 0x80, "ior", Some(1), Ior;
    Lor = 0x81, "lor", Some(1), Lor;
    Ixor = 0x82, "ixor", Some(1), Ixor;
    Lxor = 0x83, "lxor", Some(1), Lxor;
    Iinc = 0x84, "iinc", Some(3), Iinc;
    I2l = 0x85, "i2l", Some(1), I2l;
    I2f = 0x86, "i2f", Some(1), I2f;
    I2d = 0x87, "i2d", Some(1), I2d;
    L2i = 0x88, "l2i", Some(1), L2i;
    L2f = 0x89, "l2f", Some(1), L2f;
    L2d = 0x8a, "l2d", Some(1), L2d;
    F2i = 0x8b, "f2i", Some(1), F2i;
    F2l = 0x8c, "f2l", Some(1), F2l;
    F2d = 0x8d, "f2d", Some(1), F2d;
    D2i = 0x8e, "d2i", Some(1), D2i;
    D2l = 0x8f, "d2l", Some(1), D2l;
    D2f = 0x90, "d2f", Some(1), D2f;
    I2b = 0x91, "i2b", Some(1), I2b;
    I2c = 0x92, "i2c", Some(1), I2c;
    I2s = 0x93, "i2s", Some(1), I2s;
    Lcmp = 0x94, "lcmp", Some(1), Lcmp;
    Fcmpl = 0x95, "fcmpl", Some(1), Fcmpl;
    Fcmpg = 0x96, "fcmpg", Some(1), Fcmpg;
    Dcmpl = 0x97, "dcmpl", Some(1), Dcmpl;
    Dcmpg = 0x98, "dcmpg", Some(1), Dcmpg;
    Ifeq = 0x99, "ifeq", Some(3), Ifeq;
    Ifne = 0x9a, "ifne", Some(3), Ifne;
    Iflt = 0x9b, "iflt", Some(3), Iflt;
    Ifge = 0x9c, "ifge", Some(3), Ifge;
    Ifgt = 0x9d, "ifgt", Some(3), Ifgt;
    Ifle = 0x9e, "ifle", Some(3), Ifle;
    IfIcmpeq = 0x9f, "if_icmpeq", Some(3), IfIcmpeq;
    IfIcmpne = 0xa0, "if_icmpne", Some(3), IfIcmpne;
    IfIcmplt = 0xa1, "if_icmplt", Some(3), IfIcmplt;
    IfIcmpge = 0xa2, "if_icmpge", Some(3), IfIcmpge;
    IfIcmpgt = 0xa3, "if_icmpgt", Some(3), IfIcmpgt;
    IfIcmple = 0xa4, "if_icmple", Some(3), IfIcmple;
    IfAcmpeq = 0xa5, "if_acmpeq", Some(3), IfAcmpeq;
    IfAcmpne = 0xa6, "if_acmpne", Some(3), IfAcmpne;
    Goto = 0xa7, "goto", Some(3), Goto;
    Jsr = 0xa8, "jsr", Some(3), Jsr;
    Ret = 0xa9, "ret", Some(2), Ret;
    Tableswitch = 0xaa, "tableswitch", None, Tableswitch;
    Lookupswitch = 0xab, "lookupswitch", None, Lookupswitch;
    Ireturn = 0xac, "ireturn", Some(1), Ireturn;
    Lreturn = 0xad, "lreturn", Some(1), Lreturn;
    Freturn = 0xae, "freturn", Some(1), Freturn;
    Dreturn = 0xaf, "dreturn", Some(1), Dreturn;
    Areturn = 0xb0, "areturn", Some(1), Areturn;
    Return = 0xb1, "return", Some(1), Return;
    Getstatic = 0xb2, "getstatic", Some(3), Getstatic;
    Putstatic = 0xb3, "putstatic", Some(3), Putstatic;
    Getfield = 0xb4, "getfield", Some(3), Getfield;
    Putfield = 0xb5, "putfield", Some(3), Putfield;
    Invokevirtual = 0xb6, "invokevirtual", Some(3), Invokevirtual;
    Invokespecial = 0xb7, "invokespecial", Some(3), Invokespecial;
    Invokestatic = 0xb8, "invokestatic", Some(3), Invokestatic;
    Invokeinterface = 0xb9, "invokeinterface", Some(5), Invokeinterface;
    Invokedynamic = 0xba, "invokedynamic", Some(5), Invokedynamic;
    New = 0xbb, "new", Some(3), New;
    Newarray = 0xbc, "newarray", Some(2), Newarray;
    Anewarray = 0xbd, "anewarray", Some(3), Anewarray;
    Arraylength = 0xbe, "arraylength", Some(1), Arraylength;
    Athrow = 0xbf, "athrow", Some(1), Athrow;
    Checkcast = 0xc0, "checkcast", Some(3), Checkcast;
    Instanceof = 0xc1, "instanceof", Some(3), Instanceof;
    Monitorenter = 0xc2, "monitorenter", Some(1), Monitorenter;
    Monitorexit = 0xc3, "monitorexit", Some(1), Monitorexit;
    Wide = 0xc4, "wide", None, Wide;
    Multianewarray = 0xc5, "multianewarray", Some(4), Multianewarray;
    Ifnull = 0xc6, "ifnull", Some(3), Ifnull;
    Ifnonnull = 0xc7, "ifnonnull", Some(3), Ifnonnull;
    GotoW = 0xc8, "goto_w", Some(5), GotoW;
    JsrW = 0xc9, "jsr_w", Some(5), JsrW;
    Breakpoint = 0xca, "breakpoint", None, Breakpoint;
    FastAgetfield = 0xcb, "fast_agetfield", Some(3), Getfield;
    FastBgetfield = 0xcc, "fast_bgetfield", Some(3), Getfield;
    FastCgetfield = 0xcd, "fast_cgetfield", Some(3), Getfield;
    FastDgetfield = 0xce, "fast_dgetfield", Some(3), Getfield;
    FastFgetfield = 0xcf, "fast_fgetfield", Some(3), Getfield;
    FastIgetfield = 0xd0, "fast_igetfield", Some(3), Getfield;
    FastLgetfield = 0xd1, "fast_lgetfield", Some(3), Getfield;
    FastSgetfield = 0xd2, "fast_sgetfield", Some(3), Getfield;
    FastAputfield = 0xd3, "fast_aputfield", Some(3), Putfield;
    FastBputfield = 0xd4, "fast_bputfield", Some(3), Putfield;
    FastZputfield = 0xd5, "fast_zputfield", Some(3), Putfield;
    FastCputfield = 0xd6, "fast_cputfield", Some(3), Putfield;
    FastDputfield = 0xd7, "fast_dputfield", Some(3), Putfield;
    FastFputfield = 0xd8, "fast_fputfield", Some(3), Putfield;
    FastIputfield = 0xd9, "fast_iputfield", Some(3), Putfield;
    FastLputfield = 0xda, "fast_lputfield", Some(3), Putfield;
    FastSputfield = 0xdb, "fast_sputfield", Some(3), Putfield;
    FastAload0 = 0xdc, "fast_aload_0", Some(1), Aload0;
    FastIaccess0 = 0xdd, "fast_iaccess_0", Some(4), Aload0;
    FastAaccess0 = 0xde, "fast_aaccess_0", Some(4), Aload0;
    FastFaccess0 = 0xdf, "fast_faccess_0", Some(4), Aload0;
    FastIload = 0xe0, "fast_iload", Some(2), Iload;
    FastIload2 = 0xe1, "fast_iload2", Some(4), Iload;
    FastIcaload = 0xe2, "fast_icaload", Some(3), Iload;
    FastInvokevfinal = 0xe3, "fast_invokevfinal", Some(3), Invokevirtual;
    FastLinearswitch = 0xe4, "fast_linearswitch", None, Lookupswitch;
    FastBinaryswitch = 0xe5, "fast_binaryswitch", None, Lookupswitch;
    FastAldc = 0xe6, "fast_aldc", Some(2), Ldc;
    FastAldcW = 0xe7, "fast_aldc_w", Some(3), LdcW;
    ReturnRegisterFinalizer = 0xe8, "return_register_finalizer", Some(1), Return;
    Invokehandle = 0xe9, "invokehandle", Some(3), Invokevirtual;
    Shouldnotreachhere = 0xea, "shouldnotreachhere", Some(1), Shouldnotreachhere;
}

impl Bytecode {
    pub fn is_java_code(&self) -> bool {
        self.java_code() == *self
    }

    /// Length of the `wide`-prefixed form of this bytecode, prefix included
    pub fn wide_length(&self) -> Option<usize> {
        match self {
            Bytecode::Iload
            | Bytecode::Lload
            | Bytecode::Fload
            | Bytecode::Dload
            | Bytecode::Aload
            | Bytecode::Istore
            | Bytecode::Lstore
            | Bytecode::Fstore
            | Bytecode::Dstore
            | Bytecode::Astore
            | Bytecode::Ret => Some(4),
            Bytecode::Iinc => Some(6),
            _ => None,
        }
    }

    pub fn is_switch(&self) -> bool {
        matches!(
            self,
            Bytecode::Tableswitch
                | Bytecode::Lookupswitch
                | Bytecode::FastLinearswitch
                | Bytecode::FastBinaryswitch
        )
    }
}

impl std::fmt::Display for Bytecode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_values_round_trip() {
        for bytecode in Bytecode::ALL {
            assert_eq!(Bytecode::from_u8(*bytecode as u8).unwrap(), *bytecode);
        }
        assert_eq!(Bytecode::ALL.len(), 0xeb);
    }

    #[test]
    fn unknown_opcode() {
        assert!(Bytecode::from_u8(0xeb).is_err());
        assert!(Bytecode::from_u8(0xff).is_err());
    }

    #[test]
    fn fast_codes_are_numbered_after_breakpoint() {
        assert_eq!(Bytecode::Breakpoint as u8, 0xca);
        assert_eq!(Bytecode::FastAgetfield as u8, 203);
        assert_eq!(Bytecode::FastAputfield as u8, 211);
        assert_eq!(Bytecode::FastAload0 as u8, 220);
        assert_eq!(Bytecode::FastIload as u8, 224);
        assert_eq!(Bytecode::FastLinearswitch as u8, 228);
        assert_eq!(Bytecode::Invokehandle as u8, 233);
        assert_eq!(Bytecode::Shouldnotreachhere as u8, 234);
    }

    #[test]
    fn java_codes() {
        assert_eq!(Bytecode::FastIgetfield.java_code(), Bytecode::Getfield);
        assert_eq!(Bytecode::FastZputfield.java_code(), Bytecode::Putfield);
        assert_eq!(Bytecode::FastIaccess0.java_code(), Bytecode::Aload0);
        assert_eq!(Bytecode::FastIload2.java_code(), Bytecode::Iload);
        assert_eq!(Bytecode::FastBinaryswitch.java_code(), Bytecode::Lookupswitch);
        assert!(Bytecode::Iadd.is_java_code());
        assert!(!Bytecode::FastAldc.is_java_code());
    }

    #[test]
    fn pair_lengths_cover_both_instructions() {
        assert_eq!(Bytecode::FastIaccess0.length(), Some(4));
        assert_eq!(Bytecode::FastIload2.length(), Some(4));
        assert_eq!(Bytecode::FastIcaload.length(), Some(3));
        assert_eq!(Bytecode::FastAload0.length(), Some(1));
    }

    #[test]
    fn quickened_forms_keep_length() {
        for bytecode in Bytecode::ALL {
            let java = bytecode.java_code();
            let pair = matches!(
                bytecode,
                Bytecode::FastIaccess0
                    | Bytecode::FastAaccess0
                    | Bytecode::FastFaccess0
                    | Bytecode::FastIload2
                    | Bytecode::FastIcaload
            );
            if !pair {
                assert_eq!(bytecode.length(), java.length(), "{bytecode}");
            }
        }
    }

    #[test]
    fn wide_lengths() {
        assert_eq!(Bytecode::Iinc.wide_length(), Some(6));
        assert_eq!(Bytecode::Ret.wide_length(), Some(4));
        assert_eq!(Bytecode::Iadd.wide_length(), None);
    }
}
